//! Disk-backed sliding window of captured frames.
//!
//! Every image a tool returns is written here for debugging. The buffer keeps
//! the most recent `capacity` files and deletes older ones in creation order.
//! Nothing in it is ever fed back to the reasoning engine.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use bimpilot_core::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default number of frames kept per task.
pub const DEFAULT_CAPACITY: usize = 10;

/// One persisted frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub sequence: u64,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid base64 image data: {0}")]
    Decode(String),

    #[error("failed to write frame {path}: {reason}")]
    Io { path: PathBuf, reason: String },
}

/// File extension for an image mime type.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// FIFO frame store for a single task.
///
/// The index is kept in memory; the directory is never rescanned.
#[derive(Debug)]
pub struct FrameHistoryBuffer {
    dir: PathBuf,
    capacity: usize,
    next_sequence: u64,
    index: VecDeque<FrameRecord>,
}

pub(crate) fn effective_capacity(capacity: usize) -> usize {
    if capacity == 0 { DEFAULT_CAPACITY } else { capacity }
}

impl FrameHistoryBuffer {
    /// A capacity of 0 means [`DEFAULT_CAPACITY`].
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = effective_capacity(capacity);
        Self {
            dir: dir.into(),
            capacity,
            next_sequence: 0,
            index: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// A buffer under `<root>/<task_id>/`.
    pub fn for_task(root: &Path, task_id: &TaskId, capacity: usize) -> Self {
        Self::new(root.join(&task_id.0), capacity)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Stored records, oldest first.
    pub fn records(&self) -> Vec<FrameRecord> {
        self.index.iter().cloned().collect()
    }

    /// Persist one frame and evict the oldest beyond capacity.
    ///
    /// The sequence number is consumed even if the write fails.
    pub async fn record(&mut self, bytes: &[u8], mime_type: &str) -> Result<FrameRecord, FrameError> {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let path = self
            .dir
            .join(format!("frame_{sequence:06}.{}", extension_for(mime_type)));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| FrameError::Io {
                path: self.dir.clone(),
                reason: e.to_string(),
            })?;
        tokio::fs::write(&path, bytes).await.map_err(|e| FrameError::Io {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let record = FrameRecord {
            sequence,
            path,
            created_at: Utc::now(),
        };
        debug!(sequence, path = %record.path.display(), bytes = bytes.len(), "Recorded frame");
        self.index.push_back(record.clone());
        self.evict().await;
        Ok(record)
    }

    async fn evict(&mut self) {
        while self.index.len() > self.capacity {
            let Some(oldest) = self.index.pop_front() else {
                break;
            };
            if let Err(e) = tokio::fs::remove_file(&oldest.path).await {
                warn!(path = %oldest.path.display(), error = %e, "Failed to evict frame");
            }
        }
    }
}
