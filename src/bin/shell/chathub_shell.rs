//! Chathub Shell - Interactive operator console for a running chathubd
//!
//! This binary connects to the daemon's ZeroMQ console and forwards operator
//! commands (ban, enable, set, accept, reject, broadcast, search, ...) one
//! line at a time, printing each reply.

use std::io::{self, Write};
use std::time::Instant;

use clap::Parser;

/// Default ZeroMQ endpoint for chathubd
const ENDPOINT_DEFAULT: &str = "ipc:///tmp/chathubd.sock";
/// Default timeout for requests in milliseconds
const TIMEOUT: i32 = 5000;

/// Chathub Shell - operator console for chathubd
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ZeroMQ endpoint
    #[arg(long, default_value = ENDPOINT_DEFAULT)]
    endpoint: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = TIMEOUT)]
    timeout: i32,
}

/// What to do with one line of operator input
#[derive(Debug, PartialEq, Eq)]
enum ShellAction {
    Quit,
    Help,
    Clear,
    Skip,
    Send(String),
}

/// Classify a line typed at the prompt
fn parse_input(input: &str) -> ShellAction {
    let cmd = input.trim();
    match cmd.to_lowercase().as_str() {
        "" => ShellAction::Skip,
        "quit" | "q" => ShellAction::Quit,
        "help" | "h" | "?" => ShellAction::Help,
        "clear" => ShellAction::Clear,
        _ => ShellAction::Send(cmd.to_string()),
    }
}

/// Render a daemon reply: errors go to stderr, JSON is pretty-printed
fn render_reply(text: &str) -> (bool, String) {
    if text.starts_with("Error:") {
        return (true, text.to_string());
    }
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(json_value) if json_value.is_object() || json_value.is_array() => (
            false,
            serde_json::to_string_pretty(&json_value).unwrap_or_else(|_| text.to_string()),
        ),
        _ => (false, text.to_string()),
    }
}

struct ChathubShell {
    endpoint: String,
    // Context needs to be kept alive for the connection
    _context: zmq::Context,
    socket: zmq::Socket,
}

impl ChathubShell {
    /// Initialize the shell with connection parameters
    fn new(endpoint: String, timeout: i32) -> Result<Self, Box<dyn std::error::Error>> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::REQ)?;

        // Set socket timeouts to prevent hanging
        socket.set_rcvtimeo(timeout)?;
        socket.set_sndtimeo(timeout)?;
        socket.set_linger(0)?;

        socket.connect(&endpoint)?;

        Ok(ChathubShell {
            endpoint,
            _context: context,
            socket,
        })
    }

    /// Check that the daemon answers
    fn connect(&mut self) -> bool {
        let reply = self
            .socket
            .send("listCommands", 0)
            .and_then(|_| self.socket.recv_string(0));
        match reply {
            Ok(_) => true,
            Err(e) => {
                eprintln!("🔴 Connection failed: {}", e);
                eprintln!(
                    "💡 Make sure chathubd is running and its console is reachable at {}",
                    self.endpoint
                );
                false
            }
        }
    }

    /// Format and display the response from the daemon
    fn format_response(&self, reply: &[u8], start_time: Instant) {
        println!("⏱️  Response time: {:.3}s", start_time.elapsed().as_secs_f64());

        let text = String::from_utf8_lossy(reply);
        match render_reply(&text) {
            (true, text) => eprintln!("{}", text),
            (false, text) => println!("{}", text),
        }
    }

    fn show_help(&self) {
        let help_text = r#"
💬 Chathub Shell Help
=====================
Shell Commands:
  help            - Show this help message
  clear           - Clear the screen
  quit/q          - Leave the shell (the daemon keeps running)

Operator Commands:
  listCommands                          - Show all commands known to chathubd
  ban ip|words <value...> [forever]     - Ban IPs or words
  ban length <n> [forever]              - Limit message length
  enable ip|words <value...> [forever]  - Lift bans
  set EAP|SEM on|off [forever]          - Join approval / join announcements
  requests | accept <slot...> | reject <slot...>
  broadcast <message>
  search ip|user <pattern> | online | offline | banned | send_times <n>
  status | sweep | flush
  exit                                  - Flush the activity log and stop chathubd
"#;
        println!("{}", help_text);
    }

    /// Run the main interactive command loop
    fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        println!("Use 'help' for shell commands.");
        println!("💡 Operator commands: use 'listCommands' to see what chathubd accepts.");
        println!("{}", "─".repeat(80));

        let prompt = format!("[{}]> ", get_hostname());
        loop {
            print!("{}", prompt);
            io::stdout().flush()?;

            let mut input = String::new();
            match io::stdin().read_line(&mut input) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("\n🔴 Error reading input: {}", e);
                    continue;
                }
            }

            let cmd = match parse_input(&input) {
                ShellAction::Quit => break,
                ShellAction::Help => {
                    self.show_help();
                    continue;
                }
                ShellAction::Clear => {
                    // Clear screen using ANSI escape codes
                    print!("\x1B[2J\x1B[1;1H");
                    continue;
                }
                ShellAction::Skip => continue,
                ShellAction::Send(cmd) => cmd,
            };

            let start_time = Instant::now();
            if let Err(e) = self.socket.send(cmd.as_str(), 0) {
                eprintln!("🔴 Error sending command: {}", e);
                continue;
            }

            match self.socket.recv_bytes(0) {
                Ok(reply) => self.format_response(&reply, start_time),
                Err(e) => {
                    eprintln!("🔴 Error receiving response: {}", e);
                    eprintln!("💡 The command may have timed out or chathubd may be unresponsive");
                }
            }

            if cmd == "exit" {
                break;
            }
            println!("{}", "-".repeat(80));
        }

        Ok(())
    }
}

/// Get the hostname of the current machine
fn get_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(_) => "localhost".to_string(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut shell = ChathubShell::new(args.endpoint, args.timeout)?;

    if !shell.connect() {
        eprintln!("🔴 Failed to reach chathubd. The daemon may not be running.");
        std::process::exit(1);
    }

    shell.run()?;

    Ok(())
}
