//! Append-only log of identity assignments, one record per resolved observation.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reid::identity::GlobalId;
use crate::reid::resolver::Decision;
use crate::tracker::{CameraId, LocalId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub timestamp: DateTime<Utc>,
    pub camera_id: CameraId,
    pub frame_number: u64,
    pub local_id: LocalId,
    pub global_id: GlobalId,
    pub assignment_type: Decision,
    /// Best candidate similarity; `None` when the index had no candidate
    pub similarity_score: Option<f32>,
    /// Resolved without a usable index query
    #[serde(default)]
    pub degraded: bool,
}

/// Consumer of assignment records.
///
/// Called after the resolver has released its lock; implementations must not
/// call back into the resolver.
pub trait AssignmentSink: Send + Sync {
    fn record(&self, record: &AssignmentRecord);
}

/// Emits each assignment as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AssignmentSink for TracingSink {
    fn record(&self, record: &AssignmentRecord) {
        tracing::info!(
            camera_id = %record.camera_id,
            frame_number = record.frame_number,
            local_id = %record.local_id,
            global_id = %record.global_id,
            assignment_type = record.assignment_type.as_str(),
            similarity = ?record.similarity_score,
            degraded = record.degraded,
            "Identity assigned"
        );
    }
}

/// Appends records as JSON lines to a file.
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open `path` for appending, creating it when missing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    fn append(&self, record: &AssignmentRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl AssignmentSink for JsonlSink {
    fn record(&self, record: &AssignmentRecord) {
        if let Err(e) = self.append(record) {
            tracing::warn!(path = %self.path.display(), "Failed to append assignment record: {}", e);
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

/// Keeps records in memory; intended for tests and debugging tools.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AssignmentRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AssignmentRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AssignmentSink for MemorySink {
    fn record(&self, record: &AssignmentRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(global_id: u64, decision: Decision) -> AssignmentRecord {
        AssignmentRecord {
            timestamp: Utc::now(),
            camera_id: CameraId::from("cam1"),
            frame_number: 12,
            local_id: LocalId(3),
            global_id: GlobalId(global_id),
            assignment_type: decision,
            similarity_score: Some(0.82),
            degraded: false,
        }
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reid_assignment_log.jsonl");

        let sink = JsonlSink::create(&path).unwrap();
        sink.record(&record(1, Decision::NewVisitor));
        sink.record(&record(1, Decision::ReidMatch));
        sink.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["assignment_type"], "REID_MATCH");
        assert_eq!(parsed["camera_id"], "cam1");
        assert_eq!(parsed["local_id"], 3);
        assert_eq!(parsed["frame_number"], 12);
    }

    #[test]
    fn memory_sink_collects_records() {
        let sink = MemorySink::new();
        sink.record(&record(2, Decision::TrackRefresh));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].global_id, GlobalId(2));
    }
}
