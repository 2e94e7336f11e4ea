//! Incremental prediction store.
//!
//! The live set is the master dataset: at most one record per
//! (identifier, calendar date) after each batch. Records leave it only by
//! being archived, either when a newer batch replaces them or when a
//! retention sweep expires them.

pub mod archive;
pub mod lock;
pub mod summary;

use crate::config::StoreConfig;
use crate::error::PersistenceError;
use crate::types::prediction::{PredictionRecord, MASTER_COLUMNS};
use archive::{cleanup_reason, ArchiveWriter, DUPLICATE_REPLACEMENT};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use lock::StoreLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use summary::MasterSummary;
use tracing::{debug, info, warn};

pub use archive::{read_archive, ArchivedPrediction};

pub const MASTER_CSV: &str = "master_predictions.csv";
pub const MASTER_JSON: &str = "master_predictions.json";

/// Outcome of [`PredictionStore::add_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct AddBatchReport {
    pub batch_id: String,
    pub added: usize,
    /// Existing records archived because the batch replaced them
    pub replaced: usize,
    pub archive_file: Option<PathBuf>,
    pub live_total: usize,
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub cutoff: NaiveDateTime,
    pub expired: usize,
    pub archive_file: Option<PathBuf>,
    pub live_total: usize,
}

/// Outcome of [`PredictionStore::commit_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReport {
    pub added: AddBatchReport,
    pub swept: SweepReport,
}

/// Exclusive owner of a store directory for its lifetime.
#[derive(Debug)]
pub struct PredictionStore {
    dir: PathBuf,
    records: Vec<PredictionRecord>,
    archive: ArchiveWriter,
    recent_window_days: i64,
    _lock: StoreLock,
}

impl PredictionStore {
    pub fn from_config(config: &StoreConfig) -> Result<Self, PersistenceError> {
        Self::open(&config.data_dir, config.recent_window_days)
    }

    /// Open (creating if needed) a store directory and load its master
    /// dataset. An absent dataset starts empty.
    pub fn open<P: AsRef<Path>>(dir: P, recent_window_days: i64) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        let lock = StoreLock::acquire(&dir)?;

        let records = load_master(&dir.join(MASTER_CSV))?;
        info!(
            dir = %dir.display(),
            records = records.len(),
            "Prediction store opened"
        );

        Ok(Self {
            archive: ArchiveWriter::new(&dir),
            dir,
            records,
            recent_window_days,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn master_csv_path(&self) -> PathBuf {
        self.dir.join(MASTER_CSV)
    }

    pub fn master_json_path(&self) -> PathBuf {
        self.dir.join(MASTER_JSON)
    }

    pub fn archive_dir(&self) -> &Path {
        self.archive.dir()
    }

    /// Archive files written so far, oldest first.
    pub fn archive_files(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        self.archive.files()
    }

    /// The live set
    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn unique_customers(&self) -> usize {
        self.records
            .iter()
            .map(PredictionRecord::identifier)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn add_batch(
        &mut self,
        records: Vec<PredictionRecord>,
        batch_id: &str,
    ) -> Result<AddBatchReport, PersistenceError> {
        self.add_batch_at(records, batch_id, Utc::now())
    }

    /// Stamp `batch_id` on every record, archive every stored record sharing
    /// an (identifier, date) key with the batch, then append the batch.
    ///
    /// Records within the batch are not deduplicated against each other.
    /// Re-adding the same batch replaces rather than accumulates.
    pub fn add_batch_at(
        &mut self,
        mut records: Vec<PredictionRecord>,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AddBatchReport, PersistenceError> {
        for record in records.iter_mut() {
            record.batch_id = batch_id.to_string();
        }

        let new_keys: HashSet<(String, NaiveDate)> =
            records.iter().map(PredictionRecord::dedup_key).collect();
        let (replaced, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| new_keys.contains(&r.dedup_key()));

        // Archive before mutating so a failed write leaves the live set intact
        let archive_file = match self.archive.write(&replaced, DUPLICATE_REPLACEMENT, now) {
            Ok(path) => path,
            Err(e) => {
                self.records = kept.into_iter().chain(replaced).collect();
                return Err(e);
            }
        };
        if !replaced.is_empty() {
            info!(batch_id, replaced = replaced.len(), "Replaced same-day predictions");
        }

        let added = records.len();
        self.records = kept;
        self.records.extend(records);
        self.records.sort_by(|a, b| {
            a.identifier()
                .cmp(b.identifier())
                .then(a.prediction_date.cmp(&b.prediction_date))
        });

        debug!(batch_id, added, live_total = self.records.len(), "Batch added to live set");
        Ok(AddBatchReport {
            batch_id: batch_id.to_string(),
            added,
            replaced: replaced.len(),
            archive_file,
            live_total: self.records.len(),
        })
    }

    pub fn commit_batch(
        &mut self,
        records: Vec<PredictionRecord>,
        batch_id: &str,
        days_to_keep: i64,
    ) -> Result<CommitReport, PersistenceError> {
        self.commit_batch_at(records, batch_id, days_to_keep, Utc::now())
    }

    /// Add a batch, run the retention sweep and save, as one unit.
    ///
    /// On any failure the live set is restored and the archive files written
    /// by this call are removed, so neither memory nor disk keeps the batch.
    pub fn commit_batch_at(
        &mut self,
        records: Vec<PredictionRecord>,
        batch_id: &str,
        days_to_keep: i64,
        now: DateTime<Utc>,
    ) -> Result<CommitReport, PersistenceError> {
        let checkpoint = self.records.clone();
        let mut written = Vec::new();

        let result = self.commit_steps(records, batch_id, days_to_keep, now, &mut written);
        if let Err(e) = &result {
            self.records = checkpoint;
            for path in &written {
                if let Err(remove) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %remove, "Failed to remove archive of rolled back batch");
                }
            }
            warn!(batch_id, error = %e, live_total = self.records.len(), "Batch rolled back");
        }
        result
    }

    fn commit_steps(
        &mut self,
        records: Vec<PredictionRecord>,
        batch_id: &str,
        days_to_keep: i64,
        now: DateTime<Utc>,
        written: &mut Vec<PathBuf>,
    ) -> Result<CommitReport, PersistenceError> {
        let added = self.add_batch_at(records, batch_id, now)?;
        written.extend(added.archive_file.clone());
        let swept = self.retention_sweep_at(days_to_keep, now)?;
        written.extend(swept.archive_file.clone());
        self.save_at(now)?;
        Ok(CommitReport { added, swept })
    }

    pub fn retention_sweep(&mut self, days_to_keep: i64) -> Result<SweepReport, PersistenceError> {
        self.retention_sweep_at(days_to_keep, Utc::now())
    }

    /// Archive and drop every record predicted before `now - days_to_keep`.
    pub fn retention_sweep_at(
        &mut self,
        days_to_keep: i64,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, PersistenceError> {
        let cutoff = window_start(now, days_to_keep)
            .ok_or(PersistenceError::InvalidWindow { days: days_to_keep })?;
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| r.prediction_date < cutoff);

        let archive_file = match self.archive.write(&expired, &cleanup_reason(days_to_keep), now) {
            Ok(path) => path,
            Err(e) => {
                self.records = kept.into_iter().chain(expired).collect();
                return Err(e);
            }
        };
        self.records = kept;

        if !expired.is_empty() {
            info!(
                days_to_keep,
                expired = expired.len(),
                cutoff = %cutoff,
                "Retention sweep archived old predictions"
            );
        }
        Ok(SweepReport {
            cutoff,
            expired: expired.len(),
            archive_file,
            live_total: self.records.len(),
        })
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        self.save_at(Utc::now())
    }

    /// Persist the live set as CSV plus the JSON view.
    ///
    /// Both files are written to temporaries first. The previous CSV is kept
    /// as a backup until both renames succeed and restored otherwise.
    pub fn save_at(&self, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let csv_path = self.master_csv_path();
        let json_path = self.master_json_path();
        let csv_tmp = self.dir.join(format!("{MASTER_CSV}.tmp"));
        let json_tmp = self.dir.join(format!("{MASTER_JSON}.tmp"));
        let backup = self.dir.join(format!("{MASTER_CSV}.bak"));

        let cleanup = || {
            let _ = std::fs::remove_file(&csv_tmp);
            let _ = std::fs::remove_file(&json_tmp);
        };

        let summary = MasterSummary::build(&self.records, now.naive_utc(), self.recent_window_days);
        if let Err(e) = write_master_csv(&csv_tmp, &self.records)
            .and_then(|_| write_json(&json_tmp, &summary))
        {
            cleanup();
            return Err(e);
        }

        let had_previous = csv_path.exists();
        if had_previous {
            if let Err(e) = std::fs::rename(&csv_path, &backup) {
                cleanup();
                return Err(PersistenceError::io(&csv_path, e));
            }
        }

        let restore = || {
            if had_previous {
                if let Err(e) = std::fs::rename(&backup, &csv_path) {
                    warn!(path = %backup.display(), error = %e, "Failed to restore master backup");
                }
            } else {
                let _ = std::fs::remove_file(&csv_path);
            }
        };

        if let Err(e) = std::fs::rename(&csv_tmp, &csv_path) {
            restore();
            cleanup();
            return Err(PersistenceError::io(&csv_path, e));
        }
        if let Err(e) = std::fs::rename(&json_tmp, &json_path) {
            restore();
            cleanup();
            return Err(PersistenceError::io(&json_path, e));
        }
        if had_previous {
            let _ = std::fs::remove_file(&backup);
        }

        info!(
            path = %csv_path.display(),
            records = self.records.len(),
            unique_customers = summary.dataset_metadata.unique_customers,
            "Master dataset saved"
        );
        Ok(())
    }

    /// All live records for a customer (by unique id or customer id), newest first.
    pub fn customer_history(&self, id: &str) -> Vec<PredictionRecord> {
        let mut history: Vec<PredictionRecord> = self
            .records
            .iter()
            .filter(|r| r.unique_id.as_deref() == Some(id) || r.customer_id.as_deref() == Some(id))
            .cloned()
            .collect();
        history.sort_by(|a, b| b.prediction_date.cmp(&a.prediction_date));
        history
    }

    pub fn latest(&self, days: i64) -> Vec<PredictionRecord> {
        self.latest_at(days, Utc::now())
    }

    /// Live records predicted within the last `days`, newest first.
    pub fn latest_at(&self, days: i64, now: DateTime<Utc>) -> Vec<PredictionRecord> {
        let cutoff = window_start(now, days).unwrap_or(NaiveDateTime::MIN);
        let mut recent: Vec<PredictionRecord> = self
            .records
            .iter()
            .filter(|r| r.prediction_date >= cutoff)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.prediction_date.cmp(&a.prediction_date));
        recent
    }

    /// JSON view of the current live set.
    pub fn summary_at(&self, now: DateTime<Utc>) -> MasterSummary {
        MasterSummary::build(&self.records, now.naive_utc(), self.recent_window_days)
    }
}

/// `now - days`, or `None` when the window does not fit in a timestamp.
fn window_start(now: DateTime<Utc>, days: i64) -> Option<NaiveDateTime> {
    Duration::try_days(days).and_then(|window| now.naive_utc().checked_sub_signed(window))
}

fn load_master(path: &Path) -> Result<Vec<PredictionRecord>, PersistenceError> {
    if !path.exists() {
        debug!(path = %path.display(), "No master dataset yet, starting empty");
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| PersistenceError::csv(path, e))?;
    reader
        .deserialize::<PredictionRecord>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PersistenceError::csv(path, e))
}

fn write_master_csv(path: &Path, records: &[PredictionRecord]) -> Result<(), PersistenceError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| PersistenceError::csv(path, e))?;
    writer
        .write_record(MASTER_COLUMNS)
        .map_err(|e| PersistenceError::csv(path, e))?;
    for record in records {
        writer
            .write_record(record.csv_fields())
            .map_err(|e| PersistenceError::csv(path, e))?;
    }
    writer.flush().map_err(|e| PersistenceError::io(path, e))
}

fn write_json(path: &Path, summary: &MasterSummary) -> Result<(), PersistenceError> {
    let text = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, text).map_err(|e| PersistenceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::prediction::tests::sample;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_add_batch_stamps_batch_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        let report = store
            .add_batch_at(vec![sample("U1", "2025-03-01 10:00:00", 1500.0)], "b1", at(2025, 3, 1))
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.replaced, 0);
        assert!(report.archive_file.is_none());
        assert_eq!(store.records()[0].batch_id, "b1");
    }

    #[test]
    fn test_same_day_replacement_archives_old_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        store
            .add_batch_at(vec![sample("U1", "2025-03-01 08:00:00", 1500.0)], "b1", at(2025, 3, 1))
            .unwrap();
        let report = store
            .add_batch_at(vec![sample("U1", "2025-03-01 17:00:00", 1600.0)], "b2", at(2025, 3, 1))
            .unwrap();

        assert_eq!(report.replaced, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].predicted_income, 1600.0);

        let archived = read_archive(&report.archive_file.unwrap()).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].record.predicted_income, 1500.0);
        assert_eq!(archived[0].reason, "duplicate_replacement");
    }

    #[test]
    fn test_different_day_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        store
            .add_batch_at(vec![sample("U1", "2025-03-01 08:00:00", 1500.0)], "b1", at(2025, 3, 1))
            .unwrap();
        store
            .add_batch_at(vec![sample("U1", "2025-03-02 08:00:00", 1600.0)], "b2", at(2025, 3, 2))
            .unwrap();
        assert_eq!(store.len(), 2);

        let history = store.customer_history("U1");
        assert_eq!(history[0].predicted_income, 1600.0);
        assert_eq!(history[1].predicted_income, 1500.0);
    }

    #[test]
    fn test_within_batch_duplicates_are_both_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        let batch = vec![
            sample("U1", "2025-03-01 08:00:00", 1500.0),
            sample("U1", "2025-03-01 09:00:00", 1510.0),
        ];
        store.add_batch_at(batch.clone(), "b1", at(2025, 3, 1)).unwrap();
        assert_eq!(store.len(), 2);

        // the second run replaces both rather than accumulating
        let report = store.add_batch_at(batch, "b1", at(2025, 3, 1)).unwrap();
        assert_eq!(report.replaced, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_retention_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        store
            .add_batch_at(
                vec![
                    sample("OLD", "2024-11-01 10:00:00", 1000.0),
                    sample("NEW", "2025-02-25 10:00:00", 1000.0),
                ],
                "b1",
                at(2025, 3, 1),
            )
            .unwrap();

        let report = store.retention_sweep_at(90, at(2025, 3, 1)).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].identifier(), "NEW");

        let name = report.archive_file.unwrap();
        assert!(name.to_string_lossy().contains("cleanup_90days"));
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = PredictionStore::open(dir.path(), 30).unwrap();
            store
                .add_batch_at(vec![sample("U1", "2025-03-01 10:00:00", 1500.0)], "b1", at(2025, 3, 1))
                .unwrap();
            store.save_at(at(2025, 3, 1)).unwrap();
            assert!(store.master_json_path().exists());
            assert!(!dir.path().join(format!("{MASTER_CSV}.bak")).exists());
            assert!(!dir.path().join(format!("{MASTER_CSV}.tmp")).exists());
        }

        let store = PredictionStore::open(dir.path(), 30).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].batch_id, "b1");
        assert_eq!(store.records()[0].predicted_income, 1500.0);

        let json: MasterSummary =
            serde_json::from_str(&std::fs::read_to_string(store.master_json_path()).unwrap()).unwrap();
        assert_eq!(json.dataset_metadata.total_predictions, 1);
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let _store = PredictionStore::open(dir.path(), 30).unwrap();
        let err = PredictionStore::open(dir.path(), 30).unwrap_err();
        assert!(matches!(err, PersistenceError::Locked { .. }));
    }

    #[test]
    fn test_latest() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        store
            .add_batch_at(
                vec![
                    sample("A", "2025-02-27 10:00:00", 1000.0),
                    sample("B", "2025-02-28 10:00:00", 1000.0),
                    sample("C", "2025-01-01 10:00:00", 1000.0),
                ],
                "b1",
                at(2025, 3, 1),
            )
            .unwrap();

        let latest = store.latest_at(7, at(2025, 3, 1));
        let ids: Vec<&str> = latest.iter().map(|r| r.identifier()).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    /// Turn the JSON view path into a non-empty directory so the final
    /// rename of a save fails after the CSV has been moved into place.
    fn block_json_rename(dir: &Path) {
        let json = dir.join(MASTER_JSON);
        let _ = std::fs::remove_file(&json);
        std::fs::create_dir_all(json.join("blocker")).unwrap();
    }

    #[test]
    fn test_failed_save_keeps_previous_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        store
            .add_batch_at(vec![sample("U1", "2025-03-01 10:00:00", 1500.0)], "b1", at(2025, 3, 1))
            .unwrap();
        store.save_at(at(2025, 3, 1)).unwrap();
        let before = std::fs::read_to_string(store.master_csv_path()).unwrap();

        block_json_rename(dir.path());
        store
            .add_batch_at(vec![sample("U2", "2025-03-02 10:00:00", 1800.0)], "b2", at(2025, 3, 2))
            .unwrap();
        let err = store.save_at(at(2025, 3, 2)).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));

        assert_eq!(std::fs::read_to_string(store.master_csv_path()).unwrap(), before);
        assert!(!dir.path().join(format!("{MASTER_CSV}.bak")).exists());
        assert!(!dir.path().join(format!("{MASTER_CSV}.tmp")).exists());
        assert!(!dir.path().join(format!("{MASTER_JSON}.tmp")).exists());
    }

    #[test]
    fn test_failed_commit_rolls_back_live_set_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        store
            .commit_batch_at(vec![sample("U1", "2025-03-01 08:00:00", 1500.0)], "b1", 90, at(2025, 3, 1))
            .unwrap();

        block_json_rename(dir.path());
        let err = store
            .commit_batch_at(
                vec![
                    sample("U1", "2025-03-01 17:00:00", 1600.0),
                    sample("U2", "2025-03-01 17:00:00", 900.0),
                ],
                "b_fail",
                90,
                at(2025, 3, 1),
            )
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].batch_id, "b1");
        assert!(store.archive_files().unwrap().is_empty());

        std::fs::remove_dir_all(dir.path().join(MASTER_JSON)).unwrap();
        store
            .commit_batch_at(vec![sample("U3", "2025-03-01 18:00:00", 1100.0)], "b_ok", 90, at(2025, 3, 1))
            .unwrap();
        drop(store);

        let reopened = PredictionStore::open(dir.path(), 30).unwrap();
        let batches: Vec<(&str, &str)> = reopened
            .records()
            .iter()
            .map(|r| (r.identifier(), r.batch_id.as_str()))
            .collect();
        assert_eq!(batches, vec![("U1", "b1"), ("U3", "b_ok")]);
    }

    #[test]
    fn test_oversized_window_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        store
            .add_batch_at(vec![sample("U1", "2025-03-01 10:00:00", 1500.0)], "b1", at(2025, 3, 1))
            .unwrap();

        let err = store.retention_sweep_at(i64::MAX, at(2025, 3, 1)).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidWindow { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.latest_at(i64::MAX, at(2025, 3, 1)).len(), 1);
    }
}
