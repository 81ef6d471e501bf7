use crate::canvas::TiledImage;

// ============================================================================
// HISTORY STACK: full-layer snapshots with linear undo/redo
// ============================================================================

/// Linear history of annotation-layer snapshots.
///
/// `entries[0]` is always the blank layer captured at load and `index` always
/// points at the snapshot currently shown. Snapshots are copy-on-write tiled
/// images, so consecutive entries share every chunk a stroke left untouched.
pub struct HistoryStack {
    entries: Vec<TiledImage>,
    index: usize,
    /// `0` disables eviction.
    max_entries: usize,
}

impl HistoryStack {
    /// Start a history whose first entry is `initial`.
    pub fn new(initial: TiledImage, max_entries: usize) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
            // Eviction needs room for the blank entry plus the current one.
            max_entries: if max_entries == 0 { 0 } else { max_entries.max(2) },
        }
    }

    /// Record a completed stroke. Anything after `index` (the redo branch) is cut.
    pub fn push(&mut self, snapshot: TiledImage) {
        self.entries.truncate(self.index + 1);
        self.entries.push(snapshot);
        self.index = self.entries.len() - 1;
        self.prune();
    }

    /// Step back. Returns the snapshot to restore, or `None` at the first entry.
    pub fn undo(&mut self) -> Option<&TiledImage> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(&self.entries[self.index])
    }

    /// Step forward. Returns the snapshot to restore, or `None` at the last entry.
    pub fn redo(&mut self) -> Option<&TiledImage> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(&self.entries[self.index])
    }

    pub fn current(&self) -> &TiledImage {
        &self.entries[self.index]
    }

    pub fn get(&self, index: usize) -> Option<&TiledImage> {
        self.entries.get(index)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Bytes of pixel data held by the history, shared chunks counted once.
    pub fn memory_usage(&self) -> usize {
        TiledImage::shared_memory_bytes(&self.entries)
    }

    /// Evict the oldest strokes (never the blank entry) until under the cap.
    fn prune(&mut self) {
        if self.max_entries == 0 {
            return;
        }
        while self.entries.len() > self.max_entries {
            self.entries.remove(1);
            self.index -= 1;
            log::debug!("history: evicted oldest stroke, {} entries left", self.entries.len());
        }
    }
}
