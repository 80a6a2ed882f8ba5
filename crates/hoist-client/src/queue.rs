//! The upload queue shared between producers and the drain worker.
//!
//! Producers (hotkeys, drag-and-drop, a watch folder) push items from any
//! thread; at most one worker drains the queue at a time. The busy flag
//! lives inside the same lock as the items, so checking the queue and
//! claiming the worker slot is a single atomic step.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One queued file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    /// Directory the source file lives in.
    pub folder: PathBuf,
    /// File name without its extension.
    pub file_name: String,
    /// Extension including the leading dot, empty when there is none.
    pub extension: String,
    /// Temporary artifacts (screenshots, clipboard captures) are removed
    /// from disk once their upload is resolved, successful or not.
    pub temporary: bool,
}

impl UploadItem {
    /// Split `path` into folder, name, and extension. Returns `None` for
    /// paths without a file name.
    pub fn from_path(path: &Path, temporary: bool) -> Option<Self> {
        let folder = path.parent()?.to_path_buf();
        let file_name = path.file_stem()?.to_str()?.to_string();
        let extension = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{ext}"),
            None => String::new(),
        };
        Some(Self {
            folder,
            file_name,
            extension,
            temporary,
        })
    }

    /// Full path of the source file.
    pub fn path(&self) -> PathBuf {
        self.folder.join(self.remote_name())
    }

    /// The name presented to the server and shown in progress events.
    pub fn remote_name(&self) -> String {
        format!("{}{}", self.file_name, self.extension)
    }
}

struct QueueState {
    items: VecDeque<UploadItem>,
    worker_busy: bool,
}

/// FIFO of pending uploads plus the single-worker flag.
pub struct UploadQueue {
    state: Mutex<QueueState>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                worker_busy: false,
            }),
        }
    }

    /// Append items. Returns `true` when this call claimed the worker
    /// slot, i.e. the caller must start a drain; `false` when a running
    /// worker will pick the items up.
    pub fn push_and_claim(&self, items: Vec<UploadItem>) -> bool {
        let mut state = self.lock();
        state.items.extend(items);
        if state.worker_busy || state.items.is_empty() {
            false
        } else {
            state.worker_busy = true;
            true
        }
    }

    /// Pop the next item for the worker. Returns `None` when the queue is
    /// empty, releasing the worker slot in the same step.
    pub fn next_or_release(&self) -> Option<UploadItem> {
        let mut state = self.lock();
        match state.items.pop_front() {
            Some(item) => Some(item),
            None => {
                state.worker_busy = false;
                None
            }
        }
    }

    /// Empty the queue after a batch-fatal failure and release the worker
    /// slot. The drained items are returned so their outcome can still be
    /// recorded.
    pub fn abort_remaining(&self) -> Vec<UploadItem> {
        let mut state = self.lock();
        state.worker_busy = false;
        state.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // None of the critical sections can panic, so a poisoned lock only
        // means a panicking thread died elsewhere; the state is still good.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> UploadItem {
        UploadItem {
            folder: PathBuf::from("/tmp"),
            file_name: name.to_string(),
            extension: ".txt".to_string(),
            temporary: false,
        }
    }

    #[test]
    fn test_from_path_splits_name_and_extension() {
        let item = UploadItem::from_path(Path::new("/shots/screen_01.png"), true).unwrap();
        assert_eq!(item.folder, PathBuf::from("/shots"));
        assert_eq!(item.file_name, "screen_01");
        assert_eq!(item.extension, ".png");
        assert!(item.temporary);
        assert_eq!(item.remote_name(), "screen_01.png");
        assert_eq!(item.path(), PathBuf::from("/shots/screen_01.png"));
    }

    #[test]
    fn test_from_path_without_extension() {
        let item = UploadItem::from_path(Path::new("/data/README"), false).unwrap();
        assert_eq!(item.file_name, "README");
        assert_eq!(item.extension, "");
        assert_eq!(item.remote_name(), "README");
    }

    #[test]
    fn test_first_push_claims_the_worker() {
        let queue = UploadQueue::new();
        assert!(queue.push_and_claim(vec![item("a")]));
        // A second producer joins the running batch instead.
        assert!(!queue.push_and_claim(vec![item("b")]));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_empty_push_claims_nothing() {
        let queue = UploadQueue::new();
        assert!(!queue.push_and_claim(Vec::new()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_releases_and_allows_reclaim() {
        let queue = UploadQueue::new();
        assert!(queue.push_and_claim(vec![item("a"), item("b")]));

        assert_eq!(queue.next_or_release().unwrap().file_name, "a");
        assert_eq!(queue.next_or_release().unwrap().file_name, "b");
        assert!(queue.next_or_release().is_none());

        // The slot is free again, so the next push claims it.
        assert!(queue.push_and_claim(vec![item("c")]));
    }

    #[test]
    fn test_items_pushed_mid_drain_are_picked_up() {
        let queue = UploadQueue::new();
        assert!(queue.push_and_claim(vec![item("a")]));
        assert_eq!(queue.next_or_release().unwrap().file_name, "a");

        // Arrives while the worker is still busy with the batch.
        assert!(!queue.push_and_claim(vec![item("late")]));
        assert_eq!(queue.next_or_release().unwrap().file_name, "late");
        assert!(queue.next_or_release().is_none());
    }

    #[test]
    fn test_abort_drains_everything_and_releases() {
        let queue = UploadQueue::new();
        assert!(queue.push_and_claim(vec![item("a"), item("b"), item("c")]));
        assert_eq!(queue.next_or_release().unwrap().file_name, "a");

        let remaining = queue.abort_remaining();
        assert_eq!(remaining.len(), 2);
        assert!(queue.is_empty());

        // After an abort a new push starts a fresh worker.
        assert!(queue.push_and_claim(vec![item("d")]));
    }
}
