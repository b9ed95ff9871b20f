use std::env;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use crate::cli::{main_cli, Args};
use crate::config::Config;
use crate::input::manager::SessionManager;
use crate::input::target::tablet::TabletDeviceFactory;
use crate::usb::libusb::LibUsbBackend;

mod cli;
mod config;
mod drivers;
mod input;
mod usb;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let log_level = match env::var("LOG_LEVEL") {
        Ok(value) => value,
        Err(_) => "info".to_string(),
    };
    env::set_var("RUST_LOG", log_level);
    env_logger::init();

    let args = Args::parse();
    let config = match args.config.as_ref() {
        Some(path) => {
            log::debug!("Loading configuration from {}", path.display());
            Config::from_yaml_file(path)?
        }
        None => Config::default(),
    };
    if main_cli(args.cmd, &config)? {
        return Ok(());
    }

    const VERSION: &str = env!("CARGO_PKG_VERSION");
    log::info!("Starting hanvond v{}", VERSION);

    // Clear the running flag on SIGINT or SIGTERM
    let running = Arc::new(AtomicBool::new(true));
    let mut sigterm = signal(SignalKind::terminate())?;
    let stop = running.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Unable to listen for interrupt signal: {e}");
                }
            }
            _ = sigterm.recv() => (),
        }
        log::info!("Shutting down");
        stop.store(false, Ordering::SeqCst);
    });

    // libusb event handling blocks, so the session loop gets its own thread
    let session_task = tokio::task::spawn_blocking(move || {
        let backend = LibUsbBackend::new(config.vendor_id)?;
        let mut manager = SessionManager::new(backend, TabletDeviceFactory, config, running);
        manager.run();
        Ok::<(), Box<dyn Error + Send + Sync>>(())
    });

    match session_task.await? {
        Ok(()) => {
            log::info!("The session manager has exited");
            Ok(())
        }
        Err(e) => {
            log::error!("Unable to start: {e}");
            Err(e)
        }
    }
}
