// Durable attendance table.
//
// The table is rewritten in full on every save: rows go to a temp file in
// the target directory, which is then renamed over the old table. Readers
// never observe a half-written file.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::CoreError;
use crate::ledger::AttendanceRow;

/// Column header of the attendance table.
pub const TABLE_HEADER: [&str; 4] = ["Nama", "Status", "Waktu", "Mata Kuliah"];

pub trait PersistenceSink: Send + Sync {
    fn save(&self, rows: &[AttendanceRow]) -> Result<(), CoreError>;
}

/// CSV attendance table at a fixed path.
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
}

impl CsvTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table back. A missing file is an empty table.
    pub fn load(&self) -> Result<Vec<AttendanceRow>, CoreError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.error(e)),
        };
        csv::Reader::from_reader(file)
            .deserialize()
            .collect::<Result<Vec<AttendanceRow>, _>>()
            .map_err(|e| CoreError::malformed("attendance table", e.to_string()))
    }

    fn error(&self, reason: impl ToString) -> CoreError {
        CoreError::Persistence {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl PersistenceSink for CsvTable {
    fn save(&self, rows: &[AttendanceRow]) -> Result<(), CoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.error(e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.error(e))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer.write_record(TABLE_HEADER).map_err(|e| self.error(e))?;
            for row in rows {
                writer
                    .write_record([&row.name, &row.status, &row.time, &row.course])
                    .map_err(|e| self.error(e))?;
            }
            writer.flush().map_err(|e| self.error(e))?;
        }
        tmp.as_file_mut().flush().map_err(|e| self.error(e))?;
        tmp.persist(&self.path).map_err(|e| self.error(e.error))?;

        debug!(path = %self.path.display(), rows = rows.len(), "attendance table saved");
        Ok(())
    }
}
