use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AlbumKey, MediaItem};

/// Items received per album, in arrival order.
#[derive(Clone, Default)]
pub struct MediaBuffer {
    groups: Arc<Mutex<HashMap<AlbumKey, Vec<MediaItem>>>>,
}

impl MediaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, key: AlbumKey, item: MediaItem) {
        self.groups.lock().entry(key).or_default().push(item);
    }

    /// Removes and returns everything buffered for `key`. Empty when the key
    /// was never seen or has already been drained.
    pub fn drain(&self, key: &AlbumKey) -> Vec<MediaItem> {
        self.groups.lock().remove(key).unwrap_or_default()
    }

    pub fn len(&self, key: &AlbumKey) -> usize {
        self.groups.lock().get(key).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::album::test_support::media_item;

    #[test]
    fn drain_returns_items_in_arrival_order() {
        let buffer = MediaBuffer::new();
        let key = AlbumKey::new("album");
        buffer.append(key.clone(), media_item("one", Some("/svg label"), 1));
        buffer.append(key.clone(), media_item("two", None, 2));
        buffer.append(key.clone(), media_item("three", None, 3));

        let drained = buffer.drain(&key);
        let ids: Vec<&str> = drained.iter().map(|item| item.content.0.as_str()).collect();
        assert_eq!(ids, vec!["one", "two", "three"]);
        assert_eq!(drained[0].caption.as_deref(), Some("/svg label"));
    }

    #[test]
    fn second_drain_is_empty() {
        let buffer = MediaBuffer::new();
        let key = AlbumKey::new("album");
        buffer.append(key.clone(), media_item("one", None, 1));

        assert_eq!(buffer.drain(&key).len(), 1);
        assert!(buffer.drain(&key).is_empty());
        assert!(buffer.drain(&AlbumKey::new("never-seen")).is_empty());
    }

    #[test]
    fn albums_do_not_share_items() {
        let buffer = MediaBuffer::new();
        let first = AlbumKey::new("first");
        let second = AlbumKey::new("second");
        buffer.append(first.clone(), media_item("a", None, 1));
        buffer.append(second.clone(), media_item("b", None, 2));
        buffer.append(first.clone(), media_item("c", None, 3));

        assert_eq!(buffer.len(&first), 2);
        assert_eq!(buffer.drain(&second).len(), 1);
        assert_eq!(buffer.len(&first), 2);
    }
}
