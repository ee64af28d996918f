use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, WranglerError};

/// One scalar event, stored as a JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub wall_time: f64,
    pub step: i64,
    pub tag: String,
    pub value: f64,
}

/// Append-only scalar log for tracking training curves.
///
/// Tags have to be registered before they can be written.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    tags: BTreeSet<String>,
}

impl SummaryWriter {
    pub fn new<P: AsRef<Path>>(log_dir: P, name: &str) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let path = log_dir.join(format!("events.{}.jsonl", name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            tags: BTreeSet::new(),
        })
    }

    pub fn register_scalar(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn add_scalar(&mut self, tag: &str, step: i64, value: f64) -> Result<()> {
        if !self.tags.contains(tag) {
            return Err(WranglerError::UnregisteredScalar(tag.to_string()));
        }

        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let event = ScalarEvent {
            wall_time,
            step,
            tag: tag.to_string(),
            value,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every event in an event file.
    pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<ScalarEvent>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(WranglerError::from))
            .collect()
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush summaries to {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_registered_scalars_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::new(dir.path(), "model").unwrap();
        writer.register_scalar("training_loss");
        writer.add_scalar("training_loss", 0, 1.5).unwrap();
        writer.add_scalar("training_loss", 10, 0.5).unwrap();
        writer.flush().unwrap();

        let events = SummaryWriter::read_events(writer.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].step, 10);
        assert_eq!(events[1].value, 0.5);
        assert_eq!(events[0].tag, "training_loss");
    }

    #[test]
    fn rejects_unregistered_tags() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::new(dir.path(), "model").unwrap();
        assert!(matches!(
            writer.add_scalar("holdout_loss", 0, 1.0),
            Err(WranglerError::UnregisteredScalar(_))
        ));
    }
}
