//! framenet: demo server and client for framed packet networking.
//!
//! Modes:
//! - `server`: framed TCP server plus UDP echo on the same port
//! - `client`: connects through a network handler, handshakes, pings and
//!   asks the server to shut down
//! - `demo`: both in one process

use framenet::client;
use framenet::config::{Config, Mode};
use framenet::server::{Server, UdpEcho};
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        mode = ?config.mode,
        host = %config.host,
        port = config.port,
        queue_capacity = config.queue_capacity,
        "Starting framenet"
    );

    match config.mode {
        Mode::Server => run_server(&config),
        Mode::Client => run_client(&config),
        Mode::Demo => run_demo(&config),
    }
}

/// Serve TCP on the main thread and UDP echo on a helper thread until a
/// client requests shutdown.
fn run_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config.port)?;
    let port = server.local_addr()?.port();
    let echo = UdpEcho::bind(port)?.with_shutdown(server.shutdown_handle());

    let echo_thread = thread::Builder::new()
        .name("udp-echo".to_string())
        .spawn(move || echo.run())?;

    let report = server.run()?;
    info!(
        clients = report.clients,
        handshakes = report.handshakes.len(),
        "Server finished"
    );

    match echo_thread.join() {
        Ok(Ok(echoed)) => info!(echoed, "UDP echo finished"),
        Ok(Err(e)) => error!(error = %e, "UDP echo failed"),
        Err(_) => error!("UDP echo thread panicked"),
    }
    Ok(())
}

fn run_client(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    client::run(
        &config.host,
        config.port,
        config.handler_config(),
        CLIENT_TIMEOUT,
    )?;
    info!("Client finished");
    Ok(())
}

/// Server on a background thread, client on the main thread.
fn run_demo(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config.port)?;
    let port = server.local_addr()?.port();
    let server_thread = thread::Builder::new()
        .name("server".to_string())
        .spawn(move || server.run())?;

    client::run("127.0.0.1", port, config.handler_config(), CLIENT_TIMEOUT)?;

    match server_thread.join() {
        Ok(report) => {
            let report = report?;
            info!(clients = report.clients, "Server and client closed successfully");
        }
        Err(_) => error!("Server thread panicked"),
    }
    Ok(())
}
