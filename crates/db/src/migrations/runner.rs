//! Migration Runner - plans and applies migrations
//!
//! A run moves through `Init -> TableReady -> Planning -> Applying(pass) -> Done`
//! and ends in `Failed` on the first fatal error. Migrations are applied one at
//! a time, each inside its own transaction together with its ledger row.
//!
//! Gating: a file is eligible in a pass only when every lower discovered version
//! was already in the ledger when the pass began. Everything else is deferred to
//! the next pass. The number of passes is bounded by the number of distinct
//! discovered versions.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::definitions::{
    AppliedMigrationRecord, MigrationConfig, MigrationFile, MigrationPlan, MigrationRunResult, MigrationStatus,
    MigrationStatusEntry, RunnerState,
};
use super::error::{MigrationError, MigrationResult};
use super::registry::MigrationRegistry;
use super::store::ChecksumStore;
use crate::dialect::{with_transaction, DialectAdapter};
use crate::error::DbError;

/// Split `discovered` into what may run now and what has to wait.
///
/// `applied` is the set of ledger versions at the start of the pass.
pub fn plan(discovered: &[MigrationFile], applied: &HashSet<i64>) -> MigrationPlan {
    let mut sorted: Vec<&MigrationFile> = discovered.iter().collect();
    sorted.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.file_name.cmp(&b.file_name)));

    let mut plan = MigrationPlan::default();
    let mut prefix_applied = true;
    for file in sorted {
        if prefix_applied {
            plan.eligible.push(file.clone());
        } else {
            plan.deferred.push(file.clone());
        }
        prefix_applied &= applied.contains(&file.version);
    }
    plan
}

pub struct MigrationRunner {
    adapter: Arc<dyn DialectAdapter>,
    registry: MigrationRegistry,
    store: ChecksumStore,
    state: watch::Sender<RunnerState>,
    started: AtomicBool,
    stop_requested: AtomicBool,
}

impl MigrationRunner {
    pub fn new(adapter: Arc<dyn DialectAdapter>, config: MigrationConfig) -> MigrationResult<Self> {
        let registry = MigrationRegistry::new(config.migrations_dir, adapter.dialect());
        let store = ChecksumStore::new(adapter.clone(), config.migrations_table)?;
        let (state, _) = watch::channel(RunnerState::Init);

        Ok(Self {
            adapter,
            registry,
            store,
            state,
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state.borrow().clone()
    }

    /// Follow state changes, e.g. from a health endpoint
    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ChecksumStore {
        &self.store
    }

    /// Ask a running `run()` to stop before its next unapplied migration.
    ///
    /// A migration already inside its transaction still commits or rolls back.
    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            info!("Migration runner: stop requested");
        }
    }

    fn transition(&self, next: RunnerState) {
        info!("Migration runner: {}", next);
        self.state.send_replace(next);
    }

    /// Bring the schema up to date. A runner runs at most once.
    pub async fn run(&self) -> MigrationResult<MigrationRunResult> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::AlreadyStarted);
        }

        let start_time = Instant::now();
        match self.run_passes(start_time).await {
            Ok(result) => {
                info!(
                    "Migrations complete: {} applied, {} already up to date, {} pass(es) in {}ms",
                    result.applied_count(),
                    result.skipped_count,
                    result.passes,
                    result.execution_time_ms
                );
                self.transition(RunnerState::Done);
                Ok(result)
            }
            Err(err) => {
                error!("Migrations failed: {}", err);
                self.transition(RunnerState::Failed { error: err.to_string() });
                Err(err)
            }
        }
    }

    async fn run_passes(&self, start_time: Instant) -> MigrationResult<MigrationRunResult> {
        self.store.ensure_table().await?;
        self.transition(RunnerState::TableReady);

        self.transition(RunnerState::Planning);
        let discovered = self.registry.discover()?;
        let max_passes = discovered
            .iter()
            .map(|f| f.version)
            .collect::<HashSet<_>>()
            .len()
            .max(1);

        let mut applied = Vec::new();
        let mut handled: HashSet<i64> = HashSet::new();
        let mut skipped_count = 0;

        for pass in 1..=max_passes {
            let ledger = self.store.list().await?;
            if pass == 1 {
                log_orphans(&discovered, &ledger);
            }

            let recorded: HashMap<i64, &AppliedMigrationRecord> = ledger.iter().map(|r| (r.version, r)).collect();
            let snapshot: HashSet<i64> = recorded.keys().copied().collect();
            let plan = plan(&discovered, &snapshot);

            self.transition(RunnerState::Applying { pass });
            debug!(
                "Pass {}: {} eligible, {} deferred",
                pass,
                plan.eligible.len(),
                plan.deferred.len()
            );

            for file in &plan.eligible {
                if handled.contains(&file.version) {
                    continue;
                }

                match recorded.get(&file.version) {
                    Some(record) => {
                        verify_checksum(file, record)?;
                        debug!("Migration {} already applied, checksum verified", file.file_name);
                        skipped_count += 1;
                    }
                    None => {
                        if self.stop_requested.load(Ordering::SeqCst) {
                            return Err(MigrationError::Interrupted { version: file.version });
                        }
                        self.apply(file).await?;
                        applied.push(file.version);
                    }
                }
                handled.insert(file.version);
            }

            if plan.deferred.is_empty() {
                return Ok(MigrationRunResult {
                    applied,
                    skipped_count,
                    passes: pass,
                    execution_time_ms: start_time.elapsed().as_millis(),
                });
            }

            let waiting: Vec<i64> = plan.deferred.iter().map(|f| f.version).collect();
            info!("Deferring migrations {:?} until lower versions are applied", waiting);

            if pass == max_passes {
                return Err(MigrationError::UnresolvedDeferral {
                    versions: waiting,
                    passes: max_passes,
                });
            }
        }

        // The loop always returns on its last pass.
        Err(MigrationError::UnresolvedDeferral {
            versions: Vec::new(),
            passes: max_passes,
        })
    }

    /// Run one migration body and record it, atomically
    async fn apply(&self, file: &MigrationFile) -> MigrationResult<()> {
        info!("Applying migration {}", file.file_name);
        let started = Instant::now();

        let version = file.version;
        let file_name = file.file_name.clone();
        let body = file.body.clone();
        let checksum = file.checksum.clone();
        let store = self.store.clone();

        let result = with_transaction(self.adapter.as_ref(), move |tx| {
            Box::pin(async move {
                tx.execute_script(&body)
                    .await
                    .map_err(|source| MigrationError::Failed {
                        version,
                        file_name: file_name.clone(),
                        source,
                    })?;
                store.record(tx, version, &file_name, &checksum).await
            })
        })
        .await;

        match result {
            Ok(()) => {
                info!("Applied migration {} in {:?}", file.file_name, started.elapsed());
                Ok(())
            }
            Err(MigrationError::Database(DbError::ConnectionTimeout { timeout_secs })) => {
                Err(MigrationError::ConnectionTimeout { timeout_secs })
            }
            Err(MigrationError::Database(source)) => Err(MigrationError::Failed {
                version,
                file_name: file.file_name.clone(),
                source,
            }),
            Err(err) => Err(err),
        }
    }

    /// Compare discovered files with the ledger without changing anything
    pub async fn status(&self) -> MigrationResult<Vec<MigrationStatusEntry>> {
        let discovered = self.registry.discover()?;
        let ledger = self.store.list().await?;
        Ok(status_report(&discovered, &ledger))
    }
}

fn verify_checksum(file: &MigrationFile, record: &AppliedMigrationRecord) -> MigrationResult<()> {
    if file.checksum == record.checksum {
        return Ok(());
    }

    error!(
        "Checksum mismatch for migration {} ({}): recorded {}, current {}",
        file.version, file.file_name, record.checksum, file.checksum
    );
    Err(MigrationError::Drift {
        version: file.version,
        file_name: file.file_name.clone(),
        recorded: record.checksum.clone(),
        current: file.checksum.clone(),
    })
}

fn log_orphans(discovered: &[MigrationFile], ledger: &[AppliedMigrationRecord]) {
    let known: HashSet<i64> = discovered.iter().map(|f| f.version).collect();
    for record in ledger.iter().filter(|r| !known.contains(&r.version)) {
        warn!(
            "Ledger row for migration {} ({}) has no matching file",
            record.version, record.name
        );
    }
}

fn status_report(discovered: &[MigrationFile], ledger: &[AppliedMigrationRecord]) -> Vec<MigrationStatusEntry> {
    let recorded: HashMap<i64, &AppliedMigrationRecord> = ledger.iter().map(|r| (r.version, r)).collect();

    let mut entries: Vec<MigrationStatusEntry> = discovered
        .iter()
        .map(|file| {
            let status = match recorded.get(&file.version) {
                None => MigrationStatus::Pending,
                Some(record) if record.checksum == file.checksum => MigrationStatus::Applied {
                    applied_at: record.applied_at,
                },
                Some(record) => MigrationStatus::Drifted {
                    recorded: record.checksum.clone(),
                    current: file.checksum.clone(),
                },
            };
            MigrationStatusEntry {
                version: file.version,
                name: file.file_name.clone(),
                status,
            }
        })
        .collect();

    let known: HashSet<i64> = discovered.iter().map(|f| f.version).collect();
    entries.extend(
        ledger
            .iter()
            .filter(|r| !known.contains(&r.version))
            .map(|r| MigrationStatusEntry {
                version: r.version,
                name: r.name.clone(),
                status: MigrationStatus::Missing,
            }),
    );

    entries.sort_by_key(|e| e.version);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::definitions::DialectTag;
    use std::path::PathBuf;

    fn file(version: i64, name: &str) -> MigrationFile {
        MigrationFile {
            version,
            name: name.to_string(),
            file_name: format!("{}-{}.sql", version, name),
            path: PathBuf::from(format!("{}-{}.sql", version, name)),
            dialect_tag: DialectTag::Generic,
            body: String::new(),
            checksum: format!("sum{}", version),
        }
    }

    fn record(version: i64, checksum: &str) -> AppliedMigrationRecord {
        AppliedMigrationRecord {
            version,
            name: format!("{}-x.sql", version),
            checksum: checksum.to_string(),
            applied_at: None,
        }
    }

    fn versions(files: &[MigrationFile]) -> Vec<i64> {
        files.iter().map(|f| f.version).collect()
    }

    #[test]
    fn test_plan_fresh_ledger_only_first_is_eligible() {
        let files = vec![file(1, "a"), file(2, "b"), file(3, "c")];
        let plan = plan(&files, &HashSet::new());
        assert_eq!(versions(&plan.eligible), vec![1]);
        assert_eq!(versions(&plan.deferred), vec![2, 3]);
    }

    #[test]
    fn test_plan_defers_above_gap_regardless_of_discovery_order() {
        // 3 discovered before 2, and 2 is not applied yet
        let files = vec![file(1, "a"), file(3, "c"), file(2, "b")];
        let applied: HashSet<i64> = [1].into_iter().collect();

        let plan = plan(&files, &applied);
        assert_eq!(versions(&plan.eligible), vec![1, 2]);
        assert_eq!(versions(&plan.deferred), vec![3]);
    }

    #[test]
    fn test_plan_fully_applied_has_no_deferrals() {
        let files = vec![file(1, "a"), file(2, "b")];
        let applied: HashSet<i64> = [1, 2].into_iter().collect();

        let plan = plan(&files, &applied);
        assert_eq!(versions(&plan.eligible), vec![1, 2]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn test_plan_empty() {
        assert!(plan(&[], &HashSet::new()).is_empty());
    }

    #[test]
    fn test_verify_checksum() {
        let f = file(2, "add-col");
        assert!(verify_checksum(&f, &record(2, "sum2")).is_ok());

        let err = verify_checksum(&f, &record(2, "other")).unwrap_err();
        assert!(matches!(err, MigrationError::Drift { version: 2, .. }));
        assert_eq!(err.to_string(), "2-add-col.sql modified after being applied");
    }

    #[test]
    fn test_status_report() {
        let files = vec![file(1, "a"), file(2, "b"), file(3, "c")];
        let ledger = vec![record(1, "sum1"), record(2, "tampered"), record(9, "sum9")];

        let report = status_report(&files, &ledger);
        let statuses: Vec<_> = report.iter().map(|e| (e.version, e.status.clone())).collect();
        assert_eq!(
            statuses,
            vec![
                (1, MigrationStatus::Applied { applied_at: None }),
                (
                    2,
                    MigrationStatus::Drifted {
                        recorded: "tampered".into(),
                        current: "sum2".into()
                    }
                ),
                (3, MigrationStatus::Pending),
                (9, MigrationStatus::Missing),
            ]
        );
    }
}
