//! Simple chat server - entry point
//!
//! Line-based multi-user chat with file sharing, served from one thread.

use log::{error, info};
use std::process;

use simple_chat_server::{FileAccountStore, Server, ServerConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize the logger (env_logger picks up RUST_LOG environment variable)
    env_logger::init();

    info!("Launching chat server...");

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            process::exit(1);
        }
    };

    let accounts = match FileAccountStore::open(config.accounts_file_path()) {
        Ok(accounts) => accounts,
        Err(e) => {
            error!(
                "Failed to open account store {}: {e}",
                config.accounts_file_path().display()
            );
            process::exit(1);
        }
    };

    let server = match Server::bind(config, Box::new(accounts)).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server startup failed: {e}");
            process::exit(1);
        }
    };

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                shutdown.shutdown();
            }
            Err(e) => error!("Failed to listen for interrupt: {e}"),
        }
    });

    server.run().await;
}
