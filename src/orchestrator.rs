use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::Archiver;
use crate::collector::{Collector, CollectorInvoker, ToolCollector, ToolSearch};
use crate::config::IntakeConfig;
use crate::error::{IntakeError, ValidationError};
use crate::scheduler::Shutdown;
use crate::state_machine::{Event, FileRecord, FileState, FileTracker};
use crate::state_store::ProcessedStore;
use crate::sync::{GitSync, SyncManager, VersionControl};
use crate::work_order::{is_sr_number, validate};

/// Summary of one scan pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub seen: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub skipped: usize,
    pub sync_warnings: usize,
    pub archive_errors: usize,
    pub pull_ok: bool,
    /// The pass stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl ScanReport {
    fn record(&mut self, record: &FileRecord) {
        match record.final_state {
            FileState::ArchivedSuccess | FileState::Synced => self.succeeded += 1,
            FileState::ArchivedFailed | FileState::CollectedFail => self.failed += 1,
            FileState::ArchivedInvalid | FileState::Rejected => self.invalid += 1,
            FileState::ArchivedDuplicate | FileState::Duplicate => self.duplicates += 1,
            _ => self.skipped += 1,
        }
        if record.synced == Some(false) {
            self.sync_warnings += 1;
        }
        if record.archive_error.is_some() {
            self.archive_errors += 1;
        }
    }
}

/// Everything one scan pass needs, passed around explicitly.
pub struct Pipeline<C, V> {
    watch_dir: PathBuf,
    store: ProcessedStore,
    archiver: Archiver,
    invoker: CollectorInvoker<C>,
    sync: SyncManager<V>,
}

impl Pipeline<ToolCollector, GitSync> {
    /// Wires the real collector and git adapters from configuration.
    pub fn from_config(config: &IntakeConfig) -> Self {
        let collector = ToolCollector::new(
            ToolSearch::for_tool(&config.collector_tool),
            config.playbook.clone(),
        );
        Self::new(
            config.watch_dir.clone(),
            ProcessedStore::new(config.processed_log.clone()),
            Archiver::new(config.archive_dir.clone()),
            CollectorInvoker::new(collector, config.collector_retry()),
            SyncManager::new(GitSync::new(config.watch_dir.clone()), config.sync_retry()),
        )
    }
}

impl<C: Collector, V: VersionControl> Pipeline<C, V> {
    pub fn new(
        watch_dir: PathBuf,
        store: ProcessedStore,
        archiver: Archiver,
        invoker: CollectorInvoker<C>,
        sync: SyncManager<V>,
    ) -> Self {
        Self {
            watch_dir,
            store,
            archiver,
            invoker,
            sync,
        }
    }

    /// Regular files in the watched directory named exactly nine digits,
    /// sorted by name. Anything else is skipped silently.
    pub fn eligible_files(&self) -> Result<Vec<PathBuf>, IntakeError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.watch_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_sr_number(name) {
                continue;
            }
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// One full pass over the watched directory.
    ///
    /// Only a missing collector tool aborts the pass; every other per-file
    /// problem is logged and the scan moves on.
    pub async fn scan_once(&self, shutdown: &Shutdown) -> Result<ScanReport, IntakeError> {
        let mut report = ScanReport {
            pull_ok: self.sync.pull_latest().await,
            ..ScanReport::default()
        };

        if !self.watch_dir.is_dir() {
            warn!(dir = %self.watch_dir.display(), "watch directory missing, nothing to scan");
            return Ok(report);
        }

        let files = self.eligible_files()?;
        info!(count = files.len(), dir = %self.watch_dir.display(), "scan started");

        for (i, path) in files.iter().enumerate() {
            if shutdown.is_requested() {
                info!(remaining = files.len() - i, "shutdown requested, leaving remaining files");
                report.interrupted = true;
                break;
            }
            report.seen += 1;
            match self.process_file(path).await {
                Ok(record) => report.record(&record),
                Err(IntakeError::Collector(e)) if e.is_fatal() => {
                    error!(error = %e, "collector unavailable, aborting scan");
                    return Err(IntakeError::Collector(e));
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "file left in place");
                    report.skipped += 1;
                }
            }
        }

        info!(
            seen = report.seen,
            succeeded = report.succeeded,
            failed = report.failed,
            duplicates = report.duplicates,
            invalid = report.invalid,
            sync_warnings = report.sync_warnings,
            "scan finished"
        );
        Ok(report)
    }

    /// Runs one file through validation, dedup, collection, sync and archival.
    pub async fn process_file(&self, path: &Path) -> Result<FileRecord, IntakeError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tracker = FileTracker::new(file_name);

        let parsed = fs::read_to_string(path)
            .map_err(|e| ValidationError::Unreadable(e.to_string()))
            .and_then(|raw| validate(&raw));
        let order = match parsed {
            Ok(order) => order,
            Err(reason) => {
                warn!(file = %tracker.file_name, %reason, "rejected work order");
                tracker.rejection = Some(reason.to_string());
                tracker.apply(Event::Rejected)?;
                self.archive(path, &mut tracker)?;
                return Ok(self.complete(&tracker));
            }
        };
        if order.sr_number != tracker.file_name {
            warn!(
                file = %tracker.file_name,
                sr_number = %order.sr_number,
                "file name differs from SR number in content, using content"
            );
        }
        let sr_number = order.sr_number.as_str();
        tracker.work_order = Some(order.clone());
        tracker.apply(Event::Accepted)?;

        if self.store.is_processed(sr_number)? {
            info!(sr_number, "already processed, skipping collector");
            tracker.apply(Event::AlreadyProcessed)?;
            self.archive(path, &mut tracker)?;
            return Ok(self.complete(&tracker));
        }

        tracker.apply(Event::Dispatched)?;
        let invocation = self.invoker.run(&order).await;
        tracker.collector_attempts = invocation.attempts;

        match invocation.result {
            Ok(()) => {
                tracker.apply(Event::CollectSucceeded)?;
                // Commit point: from here on the SR counts as processed.
                if let Err(e) = self.store.mark_processed(sr_number) {
                    error!(sr_number, error = %e, "failed to record processed SR");
                }
                let synced = self.sync.remove_and_push(path, sr_number).await;
                tracker.synced = Some(synced);
                tracker.apply(Event::SyncAttempted)?;
                self.archive(path, &mut tracker)?;
                Ok(self.complete(&tracker))
            }
            Err(e) => {
                tracker.collector_error = Some(e.to_string());
                tracker.apply(Event::CollectFailed)?;
                self.archive(path, &mut tracker)?;
                let record = self.complete(&tracker);
                if e.is_fatal() {
                    return Err(e.into());
                }
                Ok(record)
            }
        }
    }

    // Archive errors are recorded on the tracker; they never undo earlier steps.
    fn archive(&self, path: &Path, tracker: &mut FileTracker) -> Result<(), IntakeError> {
        let Some(status) = tracker.state.archive_status() else {
            return Err(IntakeError::InvalidTransition {
                from: tracker.state.to_string(),
                event: Event::Archived.to_string(),
            });
        };
        match self.archiver.archive(path, &tracker.label(), status) {
            Ok(target) => {
                tracker.archive_path = Some(target);
                tracker.apply(Event::Archived)?;
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "archive failed");
                tracker.archive_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    fn complete(&self, tracker: &FileTracker) -> FileRecord {
        if !tracker.state.is_terminal() {
            warn!(file = %tracker.file_name, state = %tracker.state, "file did not reach a terminal state");
        }
        let record = FileRecord::from_tracker(tracker);
        match serde_json::to_string(&record) {
            Ok(json) => info!(target: "srintake::audit", record = %json, "file processed"),
            Err(e) => warn!(error = %e, "failed to serialize file record"),
        }
        record
    }
}

#[cfg(test)]
impl<C, V> Pipeline<C, V> {
    pub fn store(&self) -> &ProcessedStore {
        &self.store
    }

    pub fn invoker(&self) -> &CollectorInvoker<C> {
        &self.invoker
    }

    pub fn sync(&self) -> &SyncManager<V> {
        &self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectorError, SyncError};
    use crate::retry::RetryPolicy;
    use crate::work_order::WorkOrder;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    #[derive(Default)]
    struct MockCollector {
        /// Exit code returned for every attempt; 0 means success.
        exit_code: i32,
        missing: bool,
        calls: RefCell<Vec<(String, String, String)>>,
    }

    impl MockCollector {
        fn exiting(code: i32) -> Self {
            Self {
                exit_code: code,
                ..Self::default()
            }
        }
    }

    impl Collector for MockCollector {
        async fn collect(&self, order: &WorkOrder) -> Result<(), CollectorError> {
            self.calls.borrow_mut().push((
                order.hostname.clone(),
                order.sr_number.clone(),
                order.token.clone(),
            ));
            if self.missing {
                return Err(CollectorError::ToolNotFound {
                    tool: "lc-collector".into(),
                });
            }
            match self.exit_code {
                0 => Ok(()),
                code => Err(CollectorError::NonZeroExit { code: Some(code) }),
            }
        }
    }

    #[derive(Default)]
    struct MockVcs {
        fail_push: bool,
        pulls: Cell<u32>,
        pushed: RefCell<Vec<String>>,
    }

    impl VersionControl for MockVcs {
        async fn pull(&self) -> Result<(), SyncError> {
            self.pulls.set(self.pulls.get() + 1);
            Ok(())
        }

        async fn remove_and_push(&self, file: &Path, sr_number: &str) -> Result<(), SyncError> {
            // The archiver runs after sync, so the file must still be there.
            assert!(file.exists());
            if self.fail_push {
                return Err(SyncError::Command {
                    args: "push".into(),
                    status: "exit status: 1".into(),
                    stderr: "offline".into(),
                });
            }
            self.pushed.borrow_mut().push(sr_number.to_string());
            Ok(())
        }
    }

    struct Fixture {
        tmp: TempDir,
        pipeline: Pipeline<MockCollector, MockVcs>,
    }

    impl Fixture {
        fn new(collector: MockCollector, vcs: MockVcs) -> Self {
            let tmp = TempDir::new().unwrap();
            let inbox = tmp.path().join("incoming");
            fs::create_dir_all(&inbox).unwrap();
            let policy = RetryPolicy::new(3, Duration::from_secs(5));
            let pipeline = Pipeline::new(
                inbox,
                ProcessedStore::new(tmp.path().join("processed.log")),
                Archiver::new(tmp.path().join("archive")),
                CollectorInvoker::new(collector, policy),
                SyncManager::new(vcs, policy),
            );
            Self { tmp, pipeline }
        }

        fn ok() -> Self {
            Self::new(MockCollector::default(), MockVcs::default())
        }

        fn inbox(&self) -> PathBuf {
            self.tmp.path().join("incoming")
        }

        fn drop_file(&self, name: &str, content: &str) -> PathBuf {
            let path = self.inbox().join(name);
            fs::write(&path, content).unwrap();
            path
        }

        fn archived(&self) -> Vec<String> {
            let dir = self.tmp.path().join("archive");
            let Ok(entries) = fs::read_dir(dir) else {
                return Vec::new();
            };
            let mut names: Vec<String> = entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn calls(&self) -> usize {
            self.pipeline.invoker().collector().calls.borrow().len()
        }

        async fn scan(&self) -> ScanReport {
            self.pipeline.scan_once(&Shutdown::never()).await.unwrap()
        }
    }

    fn assert_entry(name: &str, label: &str, status: &str) {
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts.len(), 4, "unexpected archive name {name}");
        assert_eq!(parts[0], label);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3], status);
    }

    const SAMPLE: &str = "CHI21-0101-0200-14T2 700197076 JjsCaNeNHDw5VWxP";

    #[tokio::test(start_paused = true)]
    async fn first_scan_collects_then_second_is_duplicate() {
        let fx = Fixture::ok();
        let file = fx.drop_file("700197076", SAMPLE);

        let report = fx.scan().await;
        assert_eq!(report.succeeded, 1);
        assert!(!file.exists());
        assert_eq!(
            *fx.pipeline.invoker().collector().calls.borrow(),
            vec![(
                "CHI21-0101-0200-14T2".to_string(),
                "700197076".to_string(),
                "JjsCaNeNHDw5VWxP".to_string()
            )]
        );
        assert!(fx.pipeline.store().is_processed("700197076").unwrap());
        assert_eq!(*fx.pipeline.sync().vcs().pushed.borrow(), vec!["700197076"]);
        let archived = fx.archived();
        assert_eq!(archived.len(), 1);
        assert_entry(&archived[0], "700197076", "success");

        fx.drop_file("700197076", SAMPLE);
        let report = fx.scan().await;
        assert_eq!(report.duplicates, 1);
        assert_eq!(fx.calls(), 1);
        let archived = fx.archived();
        assert_eq!(archived.len(), 2);
        assert!(archived.iter().any(|n| n.ends_with("_duplicate")));
        assert_eq!(fx.pipeline.store().list().unwrap(), vec!["700197076"]);
    }

    #[tokio::test(start_paused = true)]
    async fn two_field_file_is_archived_invalid() {
        let fx = Fixture::ok();
        let file = fx.drop_file("123456789", "host token");

        let report = fx.scan().await;
        assert_eq!(report.invalid, 1);
        assert_eq!(fx.calls(), 0);
        assert!(!file.exists());
        assert!(fx.pipeline.store().list().unwrap().is_empty());
        let archived = fx.archived();
        assert_eq!(archived.len(), 1);
        assert_entry(&archived[0], "invalid", "failed");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_collector_is_retried_then_archived_failed() {
        let fx = Fixture::new(MockCollector::exiting(2), MockVcs::default());
        fx.drop_file("700197076", SAMPLE);
        let start = Instant::now();

        let report = fx.scan().await;
        assert_eq!(report.failed, 1);
        assert_eq!(fx.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert!(!fx.pipeline.store().is_processed("700197076").unwrap());
        assert!(fx.pipeline.sync().vcs().pushed.borrow().is_empty());
        assert_entry(&fx.archived()[0], "700197076", "failed");
    }

    #[tokio::test(start_paused = true)]
    async fn sync_failure_still_counts_as_success() {
        let vcs = MockVcs {
            fail_push: true,
            ..MockVcs::default()
        };
        let fx = Fixture::new(MockCollector::default(), vcs);
        fx.drop_file("700197076", SAMPLE);

        let report = fx.scan().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.sync_warnings, 1);
        assert!(fx.pipeline.store().is_processed("700197076").unwrap());
        assert_entry(&fx.archived()[0], "700197076", "success");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_tool_archives_failed_and_aborts() {
        let collector = MockCollector {
            missing: true,
            ..MockCollector::default()
        };
        let fx = Fixture::new(collector, MockVcs::default());
        fx.drop_file("100000001", "host 100000001 tok");
        let untouched = fx.drop_file("100000002", "host 100000002 tok");

        let err = fx.pipeline.scan_once(&Shutdown::never()).await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Collector(CollectorError::ToolNotFound { .. })
        ));
        assert_eq!(fx.calls(), 1);
        assert_entry(&fx.archived()[0], "100000001", "failed");
        assert!(untouched.exists());
        assert!(!fx.pipeline.store().is_processed("100000001").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn rescan_without_new_files_changes_nothing() {
        let fx = Fixture::ok();
        fx.drop_file("700197076", SAMPLE);
        fx.scan().await;
        let log_before = fs::read_to_string(fx.pipeline.store().path()).unwrap();
        let archived_before = fx.archived();

        let report = fx.scan().await;
        assert_eq!(report.seen, 0);
        assert_eq!(fx.calls(), 1);
        assert_eq!(
            fs::read_to_string(fx.pipeline.store().path()).unwrap(),
            log_before
        );
        assert_eq!(fx.archived(), archived_before);
        assert_eq!(fx.pipeline.sync().vcs().pulls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_allows_reprocessing() {
        let fx = Fixture::ok();
        fx.drop_file("700197076", SAMPLE);
        fx.scan().await;

        fx.pipeline.store().reset("700197076").unwrap();
        assert!(!fx.pipeline.store().is_processed("700197076").unwrap());

        fx.drop_file("700197076", SAMPLE);
        let report = fx.scan().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(fx.calls(), 2);
        assert!(fx.pipeline.store().is_processed("700197076").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_entries_are_ignored() {
        let fx = Fixture::ok();
        fx.drop_file("README.md", "not a work order");
        fx.drop_file("70019707", "host 700197076 tok");
        fx.drop_file("700197076.txt", SAMPLE);
        fs::create_dir_all(fx.inbox().join("123456789")).unwrap();

        let report = fx.scan().await;
        assert_eq!(report.seen, 0);
        assert_eq!(fx.calls(), 0);
        assert!(fx.archived().is_empty());
        assert!(fx.inbox().join("README.md").exists());
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn symlinks_are_not_eligible() {
        let fx = Fixture::ok();
        let target = fx.tmp.path().join("elsewhere");
        fs::write(&target, SAMPLE).unwrap();
        std::os::unix::fs::symlink(&target, fx.inbox().join("700197076")).unwrap();

        let report = fx.scan().await;
        assert_eq!(report.seen, 0);
        assert_eq!(fx.calls(), 0);
        assert!(target.exists());
        assert!(fx.archived().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn files_are_processed_in_name_order() {
        let fx = Fixture::ok();
        fx.drop_file("300000000", "h 300000000 t");
        fx.drop_file("100000000", "h 100000000 t");
        fx.drop_file("200000000", "h 200000000 t");

        let report = fx.scan().await;
        assert_eq!(report.succeeded, 3);
        let order: Vec<String> = fx
            .pipeline
            .invoker()
            .collector()
            .calls
            .borrow()
            .iter()
            .map(|(_, sr, _)| sr.clone())
            .collect();
        assert_eq!(order, vec!["100000000", "200000000", "300000000"]);
    }

    #[tokio::test(start_paused = true)]
    async fn content_sr_number_is_authoritative() {
        let fx = Fixture::ok();
        fx.drop_file("111111111", "host 222222222 tok");

        fx.scan().await;
        assert!(fx.pipeline.store().is_processed("222222222").unwrap());
        assert!(!fx.pipeline.store().is_processed("111111111").unwrap());
        assert_entry(&fx.archived()[0], "222222222", "success");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_between_files() {
        let fx = Fixture::ok();
        let file = fx.drop_file("700197076", SAMPLE);
        let (trigger, shutdown) = crate::scheduler::shutdown_channel();
        trigger.trigger();

        let report = fx.pipeline.scan_once(&shutdown).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.seen, 0);
        assert!(file.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn process_file_records_full_path() {
        let fx = Fixture::ok();
        let file = fx.drop_file("700197076", SAMPLE);

        let record = fx.pipeline.process_file(&file).await.unwrap();
        assert_eq!(record.final_state, FileState::ArchivedSuccess);
        assert_eq!(
            record.state_transitions,
            vec![
                FileState::Discovered,
                FileState::Validated,
                FileState::Dispatched,
                FileState::CollectedOk,
                FileState::Synced,
                FileState::ArchivedSuccess,
            ]
        );
        assert_eq!(record.collector_attempts, 1);
        assert_eq!(record.synced, Some(true));
        assert!(record.archive_path.is_some());
    }
}
