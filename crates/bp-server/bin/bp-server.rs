use std::{sync::Arc, thread, time::Duration};

use bp_server::{Server, config::ServerConfig};
use bp_utils::{ThreadPriority, thread_boot};
use tracing::{error, info};

fn main() {
    let config = ServerConfig::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let server = match Server::build(&config) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            error!(?err, "bp-server: failed to bind transports");
            std::process::exit(1);
        }
    };

    {
        let server = server.clone();
        ctrlc::set_handler(move || {
            info!("bp-server: shutdown signal received");
            server.shutdown();
        })
        .expect("failed to install signal handler");
    }

    // Detached: it only ever exits via process exit, so there's nothing to join.
    {
        let store = server.store.clone();
        let interval = Duration::from_secs(config.stats_interval_secs.max(1));
        thread::spawn(move || {
            thread_boot(None, ThreadPriority::Low);
            loop {
                thread::sleep(interval);
                store.publish_statistics();
            }
        });
    }

    let rpc_thread = {
        let server = server.clone();
        thread::spawn(move || server.rpc.run())
    };
    let evt_thread = {
        let server = server.clone();
        thread::spawn(move || server.evt.run())
    };

    info!(rpc_addr = %config.rpc_addr, evt_addr = %config.evt_addr, "bp-server: listening");

    let _ = rpc_thread.join();
    let _ = evt_thread.join();

    server.save_snapshot(&config);
    info!("bp-server: stopped");
}
