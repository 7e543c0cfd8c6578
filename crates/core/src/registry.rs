//! In-memory registry of staged byte buffers.
//!
//! Every buffer handed to the external tool is parked here under a freshly
//! generated identifier of the form `{uuid}.{ext}` and served read-only by
//! the staging HTTP server until the owning job deletes it. Nothing is
//! persisted; dropping the registry drops every buffer.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::CoreError;

/// Ordinal placeholder embedded in sequence template identifiers.
pub const SEQUENCE_PLACEHOLDER: &str = "%03d";

/// A single buffer held by the registry.
///
/// `data` is reference counted, so handing a clone to an in-flight HTTP
/// response stays valid even if the entry is deleted mid-read.
#[derive(Debug, Clone)]
pub struct StagedBuffer {
    pub data: Bytes,
    /// Extension used for Content-Type resolution (no leading dot).
    pub extension: String,
}

/// Identifier-to-buffer map shared by the staging server and the
/// transcoder.
///
/// Reads take a shared lock; registration and deletion take the write lock
/// so two operations on the same identifier never overlap.
pub struct BufferRegistry {
    buffers: RwLock<HashMap<String, StagedBuffer>>,
}

impl BufferRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Stage a single buffer and return its identifier (`{uuid}.{ext}`).
    pub async fn register(&self, data: Bytes, extension: &str) -> String {
        let mut buffers = self.buffers.write().await;
        let id = loop {
            let candidate = format!("{}.{extension}", uuid::Uuid::new_v4());
            if !buffers.contains_key(&candidate) {
                break candidate;
            }
        };
        buffers.insert(
            id.clone(),
            StagedBuffer {
                data,
                extension: extension.to_string(),
            },
        );
        tracing::debug!(staged_id = %id, "Buffer staged");
        id
    }

    /// Stage an ordered run of buffers as `{uuid}_000.{ext}`,
    /// `{uuid}_001.{ext}`, ... and return the template identifier
    /// `{uuid}_%03d.{ext}` addressing the whole run.
    pub async fn register_sequence(
        &self,
        frames: Vec<Bytes>,
        extension: &str,
    ) -> Result<String, CoreError> {
        if frames.is_empty() {
            return Err(CoreError::Validation(
                "a buffer sequence needs at least one frame".into(),
            ));
        }

        let mut buffers = self.buffers.write().await;
        let template = loop {
            let candidate = format!(
                "{}_{SEQUENCE_PLACEHOLDER}.{extension}",
                uuid::Uuid::new_v4()
            );
            if !buffers.contains_key(&sequence_member(&candidate, 0)) {
                break candidate;
            }
        };

        let count = frames.len();
        for (ordinal, data) in frames.into_iter().enumerate() {
            buffers.insert(
                sequence_member(&template, ordinal),
                StagedBuffer {
                    data,
                    extension: extension.to_string(),
                },
            );
        }
        tracing::debug!(staged_id = %template, count, "Buffer sequence staged");
        Ok(template)
    }

    /// Look up a staged buffer by identifier.
    pub async fn get(&self, id: &str) -> Option<StagedBuffer> {
        self.buffers.read().await.get(id).cloned()
    }

    /// Delete a staged buffer, or a whole sequence when `id` is a sequence
    /// template.
    ///
    /// Sequence deletion walks ordinals from 0 and stops at the first gap.
    /// Returns how many entries were removed.
    pub async fn delete(&self, id: &str) -> usize {
        let mut buffers = self.buffers.write().await;
        if !is_sequence_template(id) {
            return usize::from(buffers.remove(id).is_some());
        }

        let mut removed = 0;
        while buffers.remove(&sequence_member(id, removed)).is_some() {
            removed += 1;
        }
        removed
    }

    /// Remove exactly the entry stored under `id`, without interpreting it
    /// as a sequence template. Returns whether an entry was removed.
    pub async fn remove_exact(&self, id: &str) -> bool {
        self.buffers.write().await.remove(id).is_some()
    }

    /// Identifiers of every staged buffer, sorted for stable output.
    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.buffers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of staged buffers.
    pub async fn len(&self) -> usize {
        self.buffers.read().await.len()
    }

    /// Whether the registry holds no buffers.
    pub async fn is_empty(&self) -> bool {
        self.buffers.read().await.is_empty()
    }

    /// Drop every staged buffer. Used on shutdown.
    pub async fn clear(&self) -> usize {
        let mut buffers = self.buffers.write().await;
        let count = buffers.len();
        buffers.clear();
        count
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `id` is a sequence template rather than a concrete identifier.
pub fn is_sequence_template(id: &str) -> bool {
    id.contains(SEQUENCE_PLACEHOLDER)
}

/// Concrete identifier of one ordinal within a sequence template.
pub fn sequence_member(template: &str, ordinal: usize) -> String {
    template.replacen(SEQUENCE_PLACEHOLDER, &format!("{ordinal:03}"), 1)
}
