//! Interactive operator console on stdin

use super::command_registry::CommandRegistry;
use super::response_handler::format_response;
use crate::hub::Hub;
use async_std::channel::Receiver;
use async_std::task;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Printed once when the console starts
pub const INTRO: &str = "Operator console ready. Type 'help' to list commands.";

/// Read commands from `input` until EOF or until the hub shuts down.
///
/// Each command runs to completion before the next line is read.
pub fn run_console<R, W>(
    input: R,
    mut output: W,
    registry: &CommandRegistry,
    hub: &Hub,
    prompt: &str,
) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    writeln!(output, "{}", INTRO)?;
    write!(output, "{}", prompt)?;
    output.flush()?;

    for line in input.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            writeln!(output, "{}", format_response(registry.handle(&line)))?;
        }
        if hub.is_shutting_down() {
            break;
        }
        write!(output, "{}", prompt)?;
        output.flush()?;
    }
    Ok(())
}

/// Print operator notices as they arrive, each followed by a fresh prompt.
///
/// Returns once the notice channel is closed and drained.
pub fn write_notices<W: Write>(notices: &Receiver<String>, mut output: W, prompt: &str) -> io::Result<()> {
    while let Ok(notice) = task::block_on(notices.recv()) {
        write!(output, "\n{}\n{}", notice, prompt)?;
        output.flush()?;
    }
    Ok(())
}

/// Run the stdin console on its own thread, with join notices printed by a
/// second thread
pub fn spawn_stdin_console(
    registry: Arc<CommandRegistry>,
    hub: Arc<Hub>,
) -> io::Result<thread::JoinHandle<()>> {
    let prompt = format!("{}> ", hub.options().bind_addr);

    let notices = hub.operator_notices();
    let notice_prompt = prompt.clone();
    thread::Builder::new()
        .name("operator-notices".to_string())
        .spawn(move || {
            if let Err(e) = write_notices(&notices, io::stdout(), &notice_prompt) {
                debug!("Notice printer stopped: {}", e);
            }
        })?;

    thread::Builder::new()
        .name("operator-console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            match run_console(stdin.lock(), io::stdout(), &registry, &hub, &prompt) {
                Ok(()) => info!("Console input closed"),
                Err(e) => debug!("Console stopped: {}", e),
            }
        })
}
