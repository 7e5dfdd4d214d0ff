#![cfg(feature = "daemon")]

mod config;
mod hub;
mod server;
mod utils;

use async_std::task;
use clap::Parser;
use config::Args;
use futures::{FutureExt, StreamExt};
use hub::activity::ActivityLog;
use hub::admission::{bind_listener, run_admission};
use hub::moderation::load_settings;
use hub::{Hub, HubOptions, run_compaction};
use server::commands::init_commands;
use server::console::spawn_stdin_console;
use server::server::ConsoleServer;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_async_std::Signals;
use std::sync::Arc;
use tracing::{error, info, warn};
use utils::error::Result;

#[async_std::main]
async fn main() {
    let args = Args::parse();
    utils::tracing::setup_tracing(&args.trace_file);

    if let Err(e) = run(args).await {
        error!("Chat hub failed: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let endpoint = args.endpoint(std::io::stdin().lock())?;
    let moderation = load_settings(&args.settings);
    let entry_hint = config::read_entry_hint(&args.hint_file);
    if let Some(hint) = &entry_hint {
        info!("Entry hint: {}", hint.trim_end());
    }

    let listener = bind_listener(endpoint.bind_addr, endpoint.capacity)?;
    let bind_addr = listener.local_addr()?;

    let hub = Hub::new(
        HubOptions {
            bind_addr,
            capacity: endpoint.capacity,
            entry_hint,
            settings_path: args.settings.clone(),
            offline_grace: args.offline_grace(),
        },
        moderation,
        ActivityLog::new(&args.log_file),
    );
    hub.activity()
        .record(format!("Chat hub started successfully, {}.", bind_addr));
    info!(
        "Chat hub listening on {} (capacity {})",
        bind_addr, endpoint.capacity
    );

    let admission = task::spawn(run_admission(Arc::clone(&hub), listener));
    let compaction = task::spawn(run_compaction(Arc::clone(&hub), args.sweep_interval()));
    let registry = Arc::new(init_commands(Arc::clone(&hub)));

    let console_server = if args.no_ipc {
        None
    } else {
        match ConsoleServer::bind(&args.console_endpoint).await {
            Ok(mut server) => {
                let registry = Arc::clone(&registry);
                let shutdown = hub.shutdown_signal();
                Some(task::spawn(async move {
                    if let Err(e) = server.run(registry, shutdown).await {
                        error!("Operator console stopped: {}", e);
                    }
                    server.shutdown();
                }))
            }
            Err(e) => {
                warn!("Operator console over ZeroMQ unavailable: {}", e);
                None
            }
        }
    };

    // The console thread is not joined: it may be blocked reading stdin
    spawn_stdin_console(Arc::clone(&registry), Arc::clone(&hub))?;

    let mut signals = Signals::new(&[SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    let shutdown = hub.shutdown_signal();

    futures::select! {
        signal = signals.next().fuse() => {
            if let Some(signal) = signal {
                info!("Received signal {}, shutting down", signal);
            }
            if let Err(e) = hub.exit() {
                error!("Activity log not flushed: {}", e);
            }
        }
        _ = shutdown.recv().fuse() => {
            info!("Shutdown requested by operator");
        }
    }
    signals_handle.close();

    admission.await;
    compaction.await;
    if let Some(server) = console_server {
        server.await;
    }

    info!("Chat hub stopped");
    Ok(())
}
