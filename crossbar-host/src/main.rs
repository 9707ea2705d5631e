mod bus;
mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};

use crossbar_core::{BusDevice, Connector, ConnectorConfig, LineStatus};

fn main() -> Result<()> {
    env_logger::init();
    let args = config::Args::parse();
    info!("Starting CROSSBAR host...");

    let connector = Arc::new(Connector::new(ConnectorConfig {
        capacity: args.capacity,
        max_regions: args.max_regions,
        doorbell_offset: args.doorbell_offset,
        name_offset: args.name_offset,
        name_max_len: args.name_max_len,
        payload_attr: args.payload_attr.into(),
    }));

    // 1. Scan the bus and bring every advertised device up.
    for dev in bus::scan(&args.prefix) {
        let label = dev.label();
        if let Err(e) = connector.probe(dev) {
            error!("Probe of {} failed: {}", label, e);
        }
    }
    if connector.device_count() == 0 {
        warn!("No devices came up; waiting for shutdown anyway");
    }

    // 2. Shutdown flag before the dispatch threads exist.
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("installing shutdown handler")?;
    }

    // 3. One dispatch thread per shared line: the host's interrupt facility,
    // level-triggered by polling the doorbell words.
    let mut workers = Vec::new();
    for line in connector.lines() {
        let connector = Arc::clone(&connector);
        let running = Arc::clone(&running);
        let interval = Duration::from_micros(args.poll_interval_us);
        workers.push(thread::spawn(move || {
            info!("Dispatch thread up for line {}", line);
            while running.load(Ordering::SeqCst) {
                if let LineStatus::Handled(n) = connector.dispatch_line(line) {
                    debug!("Line {}: {} device(s) handled", line, n);
                }
                thread::sleep(interval);
            }
        }));
    }

    info!(
        "{} device(s) active; Ctrl-C to shut down",
        connector.device_count()
    );
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("Shutting down...");
    for worker in workers {
        let _ = worker.join();
    }
    for id in connector.devices() {
        if let Err(e) = connector.remove(id) {
            error!("Remove of {} failed: {}", id, e);
        }
    }
    info!("CROSSBAR host shutdown complete.");
    Ok(())
}
