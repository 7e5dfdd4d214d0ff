#![cfg(feature = "cli")]

use clap::{Parser, Subcommand, ValueEnum};
use zeromq::ReqSocket;
use zeromq::ZmqMessage;
use zeromq::prelude::*;

/// Default ZeroMQ endpoint of the chathubd console
const ENDPOINT_DEFAULT: &str = "ipc:///tmp/chathubd.sock";

/// Global CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// ZeroMQ endpoint of the operator console
    #[arg(long, default_value = ENDPOINT_DEFAULT)]
    endpoint: String,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// What a ban or enable addresses
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Target {
    Ip,
    Words,
}

/// Switches the operator can flip
#[derive(ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "UPPER")]
enum Flag {
    /// Joining requires operator approval
    Eap,
    /// Announce joins to the operator
    Sem,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
#[value(rename_all = "lower")]
enum Switch {
    On,
    Off,
}

/// Search modes
#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Search {
    Ip { pattern: String },
    User { pattern: String },
    Online,
    Offline,
    Banned,
    SendTimes { min: u64 },
}

/// List of available subcommands
#[derive(Subcommand, Debug)]
#[command(rename_all = "camelCase")]
enum Commands {
    /// Ban IPs or words
    Ban {
        target: Target,
        #[arg(required = true)]
        values: Vec<String>,
        /// Also save the change to the settings file
        #[arg(long)]
        forever: bool,
    },
    /// Limit the length of relayed messages
    BanLength {
        length: usize,
        #[arg(long)]
        forever: bool,
    },
    /// Lift bans on IPs or words
    Enable {
        target: Target,
        #[arg(required = true)]
        values: Vec<String>,
        #[arg(long)]
        forever: bool,
    },
    /// Toggle EAP (join approval) or SEM (join announcements)
    Set {
        flag: Flag,
        value: Switch,
        #[arg(long)]
        forever: bool,
    },
    /// Admit pending join requests
    Accept {
        #[arg(required = true)]
        slots: Vec<usize>,
    },
    /// Turn away pending join requests
    Reject {
        #[arg(required = true)]
        slots: Vec<usize>,
    },
    /// Send an announcement to every member
    Broadcast {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Query members
    #[command(subcommand)]
    Search(Search),
    Requests,
    Status,
    Sweep,
    Flush,
    /// Flush the activity log and stop the daemon
    Exit,
    ListCommands,
}

/// Build the console command line for a subcommand
fn command_line(command: &Commands) -> String {
    let forever = |enabled: bool| if enabled { " forever" } else { "" };
    let target = |t: &Target| match t {
        Target::Ip => "ip",
        Target::Words => "words",
    };
    let join = |values: &[String]| values.join(" ");
    let slots = |slots: &[usize]| {
        slots
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    };

    match command {
        Commands::Ban {
            target: t,
            values,
            forever: f,
        } => format!("ban {} {}{}", target(t), join(values), forever(*f)),
        Commands::BanLength { length, forever: f } => {
            format!("ban length {}{}", length, forever(*f))
        }
        Commands::Enable {
            target: t,
            values,
            forever: f,
        } => format!("enable {} {}{}", target(t), join(values), forever(*f)),
        Commands::Set {
            flag,
            value,
            forever: f,
        } => {
            let flag = match flag {
                Flag::Eap => "EAP",
                Flag::Sem => "SEM",
            };
            let value = match value {
                Switch::On => "on",
                Switch::Off => "off",
            };
            format!("set {} {}{}", flag, value, forever(*f))
        }
        Commands::Accept { slots: s } => format!("accept {}", slots(s)),
        Commands::Reject { slots: s } => format!("reject {}", slots(s)),
        Commands::Broadcast { message } => format!("broadcast {}", join(message)),
        Commands::Search(search) => match search {
            Search::Ip { pattern } => format!("search ip {}", pattern),
            Search::User { pattern } => format!("search user {}", pattern),
            Search::Online => "search online".to_string(),
            Search::Offline => "search offline".to_string(),
            Search::Banned => "search banned".to_string(),
            Search::SendTimes { min } => format!("search send_times {}", min),
        },
        Commands::Requests => "requests".to_string(),
        Commands::Status => "status".to_string(),
        Commands::Sweep => "sweep".to_string(),
        Commands::Flush => "flush".to_string(),
        Commands::Exit => "exit".to_string(),
        Commands::ListCommands => "listCommands".to_string(),
    }
}

/// Entry point
#[async_std::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Connect to the daemon via ZeroMQ
    let mut socket = ReqSocket::new();
    if let Err(e) = socket.connect(&cli.endpoint).await {
        eprintln!("Error: cannot reach chathubd at {}: {e}", cli.endpoint);
        std::process::exit(1);
    }

    match send_command(&mut socket, &command_line(&cli.command)).await {
        Ok(reply) if reply.starts_with("Error:") => {
            eprintln!("{}", reply);
            std::process::exit(1);
        }
        Ok(reply) => println!("{}", reply),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Send one command line and wait for the reply
async fn send_command(
    socket: &mut ReqSocket,
    cmdline: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    socket.send(ZmqMessage::from(cmdline.to_string())).await?;
    let reply = socket.recv().await?;

    // Get the first frame as a UTF-8 string
    let reply_str = match reply.get(0) {
        Some(frame) => String::from_utf8(frame.to_vec())?,
        None => String::new(),
    };
    Ok(reply_str)
}
