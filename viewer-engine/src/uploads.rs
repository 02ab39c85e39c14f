// viewer-engine/src/uploads.rs
use common::{DeclaredFile, FileFragment};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{LiveError, LiveResult};

// Upper bound on buffer space reserved up front from a client-declared size
const PREALLOC_LIMIT: usize = 1 << 20;

/// A declared file whose fragments are still arriving
pub struct PartialFile {
    file_id: String,
    name: String,
    mime_type: String,
    declared_size: u64,
    max_part_index: u32,
    parts: Mutex<BTreeMap<u32, Vec<u8>>>,
    arrived: Notify,
}

impl PartialFile {
    fn new(declared: DeclaredFile) -> Self {
        Self {
            file_id: declared.file_id,
            name: declared.name,
            mime_type: declared.mime_type,
            declared_size: declared.size,
            max_part_index: declared.max_part_index,
            parts: Mutex::new(BTreeMap::new()),
            arrived: Notify::new(),
        }
    }

    fn parts(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, Vec<u8>>> {
        self.parts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, part_index: u32, data: Vec<u8>) {
        self.parts().insert(part_index, data);
        self.arrived.notify_one();
    }

    fn take(&self, part_index: u32) -> Option<Vec<u8>> {
        self.parts().remove(&part_index)
    }
}

/// Pending uploads of one viewer, keyed by file ID
#[derive(Clone, Default)]
pub(crate) struct UploadTable {
    files: Arc<DashMap<String, Arc<PartialFile>>>,
}

impl UploadTable {
    pub fn declare(&self, declared: DeclaredFile, stall: Duration) -> UploadHandle {
        let file = Arc::new(PartialFile::new(declared));
        if self
            .files
            .insert(file.file_id.clone(), Arc::clone(&file))
            .is_some()
        {
            tracing::warn!("Upload {} re-declared; earlier parts discarded", file.file_id);
        }
        UploadHandle {
            file,
            table: self.clone(),
            stall,
        }
    }

    /// Store a fragment; unknown files and out-of-range parts are dropped
    pub fn accept(&self, fragment: FileFragment) -> bool {
        let Some(file) = self.files.get(&fragment.file_id).map(|f| f.value().clone()) else {
            tracing::trace!("Dropping fragment for unknown upload {}", fragment.file_id);
            return false;
        };
        if fragment.part_index > file.max_part_index {
            tracing::debug!(
                "Dropping part {} of upload {} (last part is {})",
                fragment.part_index,
                file.file_id,
                file.max_part_index
            );
            return false;
        }
        file.store(fragment.part_index, fragment.data);
        true
    }

    /// Another handle on a file that is still pending
    pub fn handle(&self, file_id: &str, stall: Duration) -> Option<UploadHandle> {
        let file = self.files.get(file_id).map(|f| f.value().clone())?;
        Some(UploadHandle {
            file,
            table: self.clone(),
            stall,
        })
    }

    // Leaves a newer declaration under the same ID in place
    fn finish(&self, file: &Arc<PartialFile>) {
        self.files
            .remove_if(&file.file_id, |_, current| Arc::ptr_eq(current, file));
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

/// Placeholder for a declared file handed to form callbacks.
///
/// Metadata is available immediately; the bytes come from `assemble`.
#[derive(Clone)]
pub struct UploadHandle {
    file: Arc<PartialFile>,
    table: UploadTable,
    stall: Duration,
}

impl UploadHandle {
    pub fn file_id(&self) -> &str {
        &self.file.file_id
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn mime_type(&self) -> &str {
        &self.file.mime_type
    }

    pub fn size(&self) -> u64 {
        self.file.declared_size
    }

    pub fn max_part_index(&self) -> u32 {
        self.file.max_part_index
    }

    /// Every part from 0 to `max_part_index` is buffered
    pub fn is_complete(&self) -> bool {
        let parts = self.file.parts();
        (0..=self.file.max_part_index).all(|index| parts.contains_key(&index))
    }

    /// Wait for parts in index order and return the concatenated bytes.
    ///
    /// Fails with `UploadStalled` when no expected part arrives for the stall
    /// window; the pending upload is discarded either way.
    pub async fn assemble(&self) -> LiveResult<Vec<u8>> {
        let capacity = usize::try_from(self.file.declared_size)
            .unwrap_or(0)
            .min(PREALLOC_LIMIT);
        let mut assembled = Vec::with_capacity(capacity);
        let mut next = 0u32;
        let mut deadline = Instant::now() + self.stall;

        loop {
            match self.file.take(next) {
                Some(bytes) => {
                    assembled.extend_from_slice(&bytes);
                    if next == self.file.max_part_index {
                        break;
                    }
                    next += 1;
                    deadline = Instant::now() + self.stall;
                }
                None => {
                    let arrived = self.file.arrived.notified();
                    if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                        tracing::warn!(
                            "Upload {} stalled waiting for part {} of {}",
                            self.file.file_id,
                            next,
                            self.file.max_part_index
                        );
                        self.table.finish(&self.file);
                        return Err(LiveError::UploadStalled {
                            file_id: self.file.file_id.clone(),
                        });
                    }
                }
            }
        }

        self.table.finish(&self.file);
        tracing::debug!("Upload {} assembled ({} bytes)", self.file.file_id, assembled.len());
        Ok(assembled)
    }
}

impl fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandle")
            .field("file_id", &self.file.file_id)
            .field("name", &self.file.name)
            .field("mime_type", &self.file.mime_type)
            .field("size", &self.file.declared_size)
            .field("max_part_index", &self.file.max_part_index)
            .finish()
    }
}
