//! Dispatch of work orders to the external collection tool.
//!
//! [`Collector`] is one attempt against the tool; [`CollectorInvoker`] adds the
//! retry policy on top. [`ToolCollector`] is the real subprocess adapter.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::CollectorError;
use crate::retry::RetryPolicy;
use crate::work_order::WorkOrder;

/// One collection attempt for a work order.
pub trait Collector {
    async fn collect(&self, order: &WorkOrder) -> Result<(), CollectorError>;
}

/// Where to look for the collector executable, in lookup order.
#[derive(Debug, Clone)]
pub struct ToolSearch {
    /// Name looked up on PATH.
    pub name: String,
    /// User-local binary, normally `~/.local/bin/<name>`.
    pub user_local: Option<PathBuf>,
    /// Binary in the working directory, normally `./<name>`.
    pub local: PathBuf,
}

impl ToolSearch {
    pub fn for_tool(name: &str) -> Self {
        Self {
            name: name.to_string(),
            user_local: dirs::home_dir().map(|home| home.join(".local").join("bin").join(name)),
            local: Path::new(".").join(name),
        }
    }

    /// PATH first, then the user-local path, then the working directory.
    pub fn resolve(&self) -> Result<PathBuf, CollectorError> {
        if let Ok(path) = which::which(&self.name) {
            return Ok(path);
        }
        if let Some(path) = self.user_local.as_ref().filter(|p| p.is_file()) {
            return Ok(path.clone());
        }
        if self.local.is_file() {
            return Ok(self.local.clone());
        }
        Err(CollectorError::ToolNotFound {
            tool: self.name.clone(),
        })
    }
}

/// Runs the collector executable as a child process.
#[derive(Debug, Clone)]
pub struct ToolCollector {
    search: ToolSearch,
    playbook: String,
}

impl ToolCollector {
    pub fn new(search: ToolSearch, playbook: impl Into<String>) -> Self {
        Self {
            search,
            playbook: playbook.into(),
        }
    }

    /// Full argument list passed to the tool for `order`.
    pub fn arguments(&self, order: &WorkOrder) -> Vec<String> {
        vec![
            "--playbook".to_string(),
            self.playbook.clone(),
            order.hostname.clone(),
            order.sr_number.clone(),
            order.token.clone(),
        ]
    }
}

impl Collector for ToolCollector {
    async fn collect(&self, order: &WorkOrder) -> Result<(), CollectorError> {
        let tool = self.search.resolve()?;
        debug!(tool = %tool.display(), sr_number = %order.sr_number, "starting collector");

        let status = Command::new(&tool)
            .args(self.arguments(order))
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(CollectorError::Spawn)?;

        if status.success() {
            Ok(())
        } else {
            Err(CollectorError::NonZeroExit {
                code: status.code(),
            })
        }
    }
}

/// Retry-wrapped collector used by the scan orchestrator.
pub struct CollectorInvoker<C> {
    collector: C,
    policy: RetryPolicy,
}

/// What a finished invocation sequence looked like.
#[derive(Debug)]
pub struct Invocation {
    pub attempts: u32,
    pub result: Result<(), CollectorError>,
}

impl<C: Collector> CollectorInvoker<C> {
    pub fn new(collector: C, policy: RetryPolicy) -> Self {
        Self { collector, policy }
    }

    /// Runs the collector for `order`, retrying execution failures.
    ///
    /// A missing tool is returned as-is after one attempt; exhausting the
    /// budget yields [`CollectorError::Exhausted`].
    pub async fn run(&self, order: &WorkOrder) -> Invocation {
        let sr_number = order.sr_number.as_str();
        info!(sr_number, hostname = %order.hostname, "dispatching to collector");

        let attempts = Cell::new(0u32);
        let outcome = self
            .policy
            .run(
                "collector",
                |attempt| {
                    attempts.set(attempt);
                    async move {
                        let result = self.collector.collect(order).await;
                        if let Err(CollectorError::NonZeroExit { code }) = &result {
                            warn!(sr_number, attempt, exit_code = ?code, "collector failed");
                        }
                        result
                    }
                },
                CollectorError::is_retryable,
            )
            .await;

        let result = match outcome {
            Ok(()) => {
                info!(sr_number, attempts = attempts.get(), "collector succeeded");
                Ok(())
            }
            Err(failure) if failure.exhausted => {
                error!(sr_number, attempts = failure.attempts, "collector retries exhausted");
                Err(CollectorError::Exhausted {
                    attempts: failure.attempts,
                    last: Box::new(failure.error),
                })
            }
            Err(failure) => {
                error!(sr_number, error = %failure.error, "collector not retried");
                Err(failure.error)
            }
        };

        Invocation {
            attempts: attempts.get(),
            result,
        }
    }
}

#[cfg(test)]
impl<C> CollectorInvoker<C> {
    pub fn collector(&self) -> &C {
        &self.collector
    }
}
