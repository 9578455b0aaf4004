mod archive;
mod cli;
mod collector;
mod config;
mod error;
mod lock;
mod logging;
mod orchestrator;
mod retry;
mod scheduler;
mod state_machine;
mod state_store;
mod sync;
mod ui;
mod work_order;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use archive::Archiver;
use cli::{Cli, Mode};
use config::IntakeConfig;
use error::IntakeError;
use lock::{InstanceLock, OsLiveness};
use orchestrator::Pipeline;
use scheduler::{install_signal_handlers, shutdown_channel};
use state_store::ProcessedStore;
use ui::Printer;
use work_order::is_sr_number;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let printer = Printer::default();

    match run(cli, &printer).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            printer.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, printer: &Printer) -> Result<()> {
    let config = IntakeConfig::load_from(&cli.config)?;
    let _log_guard = logging::init(&config.log_dir, cli.verbose)?;

    let result = dispatch(cli.mode(), &config, printer).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "exiting with failure");
    }
    result
}

async fn dispatch(mode: Mode, config: &IntakeConfig, printer: &Printer) -> Result<()> {
    match mode {
        Mode::List => {
            let entries = ProcessedStore::new(config.processed_log.clone()).list()?;
            printer.processed_list(&entries);
        }
        Mode::Reset(sr_number) => {
            if !is_sr_number(&sr_number) {
                return Err(IntakeError::InvalidSrNumber(sr_number).into());
            }
            let lock = InstanceLock::acquire(&config.lock_file, &OsLiveness)?;
            ProcessedStore::new(config.processed_log.clone()).reset(&sr_number)?;
            lock.release()?;
            printer.reset_done(&sr_number);
        }
        Mode::Cleanup => {
            let lock = InstanceLock::acquire(&config.lock_file, &OsLiveness)?;
            let removed = Archiver::new(config.archive_dir.clone()).cleanup(config.retention_days)?;
            lock.release()?;
            printer.cleanup_done(removed, config.retention_days);
        }
        Mode::Scan => {
            let lock = InstanceLock::acquire(&config.lock_file, &OsLiveness)?;
            let (trigger, shutdown) = shutdown_channel();
            install_signal_handlers(trigger);

            let pipeline = Pipeline::from_config(config);
            let report = scheduler::scan(&pipeline, &shutdown).await?;
            lock.release()?;
            printer.scan_report(&report);
        }
        Mode::Watch(interval) => {
            let lock = InstanceLock::acquire(&config.lock_file, &OsLiveness)?;
            let (trigger, shutdown) = shutdown_channel();
            install_signal_handlers(trigger);

            let interval = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.watch_interval());
            let pipeline = Pipeline::from_config(config);
            let passes =
                scheduler::watch(&pipeline, interval, shutdown, |report| printer.scan_report(report))
                    .await?;
            lock.release()?;
            info!(passes, "shut down cleanly");
        }
    }
    Ok(())
}
