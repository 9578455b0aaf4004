//! One-shot and interval scanning with cooperative shutdown.
//!
//! Shutdown is only honoured at boundaries: between files inside a scan and
//! during the idle sleep between scans. A file that is being processed always
//! runs to completion.

use std::future::pending;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::collector::Collector;
use crate::error::IntakeError;
use crate::orchestrator::{Pipeline, ScanReport};
use crate::sync::VersionControl;

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A signal that never fires.
    #[cfg(test)]
    pub fn never() -> Self {
        shutdown_channel().1
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Trigger dropped without firing.
                pending::<()>().await;
            }
        }
    }
}

/// Fires `trigger` on SIGINT or SIGTERM.
pub fn install_signal_handlers(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested, finishing current work");
        trigger.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Runs a single scan pass.
pub async fn scan<C: Collector, V: VersionControl>(
    pipeline: &Pipeline<C, V>,
    shutdown: &Shutdown,
) -> Result<ScanReport, IntakeError> {
    pipeline.scan_once(shutdown).await
}

/// Scans every `interval` until shutdown, handing each report to `on_report`.
/// Returns the number of completed passes.
pub async fn watch<C, V, F>(
    pipeline: &Pipeline<C, V>,
    interval: Duration,
    mut shutdown: Shutdown,
    mut on_report: F,
) -> Result<u64, IntakeError>
where
    C: Collector,
    V: VersionControl,
    F: FnMut(&ScanReport),
{
    info!(interval_secs = interval.as_secs(), "watch started");
    let mut passes = 0;
    loop {
        let report = pipeline.scan_once(&shutdown).await?;
        passes += 1;
        on_report(&report);

        if shutdown.is_requested() {
            break;
        }
        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.wait() => break,
        }
    }
    info!(passes, "watch stopped");
    Ok(passes)
}
