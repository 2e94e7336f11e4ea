//! Append-only archive of records removed from the live set.
//!
//! Every removal (dedup replacement or retention sweep) writes a new
//! timestamped CSV under `archive/`. Files are never overwritten.

use crate::error::PersistenceError;
use crate::types::prediction::{prediction_date_format, PredictionRecord, MASTER_COLUMNS, PREDICTION_DATE_FORMAT};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

pub const ARCHIVE_DIR: &str = "archive";

/// Reason tag for records replaced by a newer prediction on the same day.
pub const DUPLICATE_REPLACEMENT: &str = "duplicate_replacement";

/// Reason tag for records removed by a retention sweep.
pub fn cleanup_reason(days: i64) -> String {
    format!("cleanup_{days}days")
}

/// A record as read back from an archive file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedPrediction {
    pub record: PredictionRecord,
    pub reason: String,
    pub archived_date: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    dir: PathBuf,
}

impl ArchiveWriter {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(ARCHIVE_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `records` to a new archive file. Returns `None` when there is
    /// nothing to archive.
    pub fn write(
        &self,
        records: &[PredictionRecord],
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, PersistenceError> {
        if records.is_empty() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;

        let stamp = now.format("%Y%m%d_%H%M%S_%6f").to_string();
        let (path, file) = self.create_unique(reason, &stamp)?;
        let archived_date = now.naive_utc().format(PREDICTION_DATE_FORMAT).to_string();

        let mut writer = csv::Writer::from_writer(file);
        let mut header: Vec<&str> = MASTER_COLUMNS.to_vec();
        header.extend(["reason", "archived_date"]);
        writer
            .write_record(&header)
            .map_err(|e| PersistenceError::csv(&path, e))?;
        for record in records {
            let mut fields = record.csv_fields();
            fields.push(reason.to_string());
            fields.push(archived_date.clone());
            writer
                .write_record(&fields)
                .map_err(|e| PersistenceError::csv(&path, e))?;
        }
        writer.flush().map_err(|e| PersistenceError::io(&path, e))?;

        info!(
            path = %path.display(),
            records = records.len(),
            reason,
            "Archived predictions"
        );
        Ok(Some(path))
    }

    /// Open a file that does not exist yet, suffixing the name on collision.
    fn create_unique(&self, reason: &str, stamp: &str) -> Result<(PathBuf, std::fs::File), PersistenceError> {
        let base = format!("archived_predictions_{reason}_{stamp}");
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{base}.csv")
            } else {
                format!("{base}_{attempt}.csv")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(PersistenceError::io(&path, e)),
            }
        }
    }

    /// Archive files in this store, oldest name first.
    pub fn files(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| PersistenceError::io(&self.dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Read an archive file back.
pub fn read_archive(path: &Path) -> Result<Vec<ArchivedPrediction>, PersistenceError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| PersistenceError::csv(path, e))?;
    let headers = reader.headers().map_err(|e| PersistenceError::csv(path, e))?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let master_headers = csv::StringRecord::from(MASTER_COLUMNS.to_vec());

    let (Some(reason_col), Some(date_col)) = (column("reason"), column("archived_date")) else {
        return Err(PersistenceError::csv(
            path,
            csv::Error::from(std::io::Error::new(
                ErrorKind::InvalidData,
                "archive file lacks reason/archived_date columns",
            )),
        ));
    };

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| PersistenceError::csv(path, e))?;
        let master: csv::StringRecord = MASTER_COLUMNS
            .iter()
            .map(|c| column(c).and_then(|i| row.get(i)).unwrap_or(""))
            .collect();
        let record: PredictionRecord = master
            .deserialize(Some(&master_headers))
            .map_err(|e| PersistenceError::csv(path, e))?;
        let archived_date = row
            .get(date_col)
            .and_then(prediction_date_format::parse)
            .unwrap_or(record.prediction_date);
        out.push(ArchivedPrediction {
            reason: row.get(reason_col).unwrap_or_default().to_string(),
            archived_date,
            record,
        });
    }
    Ok(out)
}
