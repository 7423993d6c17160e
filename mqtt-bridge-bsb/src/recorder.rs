//! Append-only telegram log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bsb_common::{Telegram, TelegramRecord};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;

/// Writes every telegram as one JSON line.
pub struct TelegramRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl TelegramRecorder {
    /// Open (or create) the log file in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one telegram. Failures are logged and otherwise ignored.
    pub fn record(&self, telegram: &Telegram) {
        let record = TelegramRecord::from(telegram);
        let mut line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, name = %telegram.name, "Failed to serialize telegram record");
                return;
            }
        };
        line.push('\n');

        let mut file = self.file.lock();
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(path = %self.path.display(), error = %e, "Failed to append telegram record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsb_common::CommandKind;

    #[test]
    fn test_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telegram_log.json");

        let recorder = TelegramRecorder::open(&path).unwrap();
        recorder.record(
            &Telegram::new(0x00, 0x7F, CommandKind::Info, "hc1_status", vec![0, 0x45])
                .with_raw(vec![0xDC, 0x80, 0x7F, 0x0B]),
        );
        recorder.record(&Telegram::new(0x42, 0x00, CommandKind::Query, "boiler_temp", vec![]));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: TelegramRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.telegram_raw, vec![0xDC, 0x80, 0x7F, 0x0B]);
        assert!(first.timestamp > 0.0);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");

        for _ in 0..2 {
            let recorder = TelegramRecorder::open(&path).unwrap();
            recorder.record(&Telegram::new(0, 0x7F, CommandKind::Info, "datetime", vec![1]));
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let result = TelegramRecorder::open("/nonexistent/dir/log.json");
        assert!(result.is_err());
    }
}
