use crate::catalog::MediaCatalog;
use crate::item::{MediaItem, Reaction};

/// Lightbox state over the sorted sequence currently on screen.
///
/// The open state remembers the id alongside the index so a reorder can be
/// followed by [`GalleryNavigator::resync`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GalleryNavigator {
    #[default]
    Closed,
    Open { index: usize, id: String },
}

impl GalleryNavigator {
    pub fn is_open(&self) -> bool {
        matches!(self, GalleryNavigator::Open { .. })
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            GalleryNavigator::Open { index, .. } => Some(*index),
            GalleryNavigator::Closed => None,
        }
    }

    pub fn current<'a>(&self, sequence: &'a [MediaItem]) -> Option<&'a MediaItem> {
        self.index().and_then(|index| sequence.get(index))
    }

    /// Opens at `index`. Out-of-range indexes leave the state unchanged.
    pub fn open(&mut self, index: usize, sequence: &[MediaItem]) -> bool {
        let Some(item) = sequence.get(index) else {
            return false;
        };
        *self = GalleryNavigator::Open {
            index,
            id: item.id.clone(),
        };
        true
    }

    pub fn next(&mut self, sequence: &[MediaItem]) {
        self.step(sequence, 1);
    }

    pub fn prev(&mut self, sequence: &[MediaItem]) {
        self.step(sequence, -1);
    }

    fn step(&mut self, sequence: &[MediaItem], delta: isize) {
        let GalleryNavigator::Open { index, .. } = self else {
            return;
        };
        if sequence.is_empty() {
            *self = GalleryNavigator::Closed;
            return;
        }
        let len = sequence.len() as isize;
        let target = (*index as isize + delta).rem_euclid(len) as usize;
        *self = GalleryNavigator::Open {
            index: target,
            id: sequence[target].id.clone(),
        };
    }

    pub fn close(&mut self) {
        *self = GalleryNavigator::Closed;
    }

    /// Re-points at the same item after the sequence changed order, or
    /// closes when that item is gone.
    pub fn resync(&mut self, sequence: &[MediaItem]) {
        let GalleryNavigator::Open { id, .. } = self else {
            return;
        };
        match sequence.iter().position(|item| item.id == *id) {
            Some(index) => {
                let id = std::mem::take(id);
                *self = GalleryNavigator::Open { index, id };
            }
            None => *self = GalleryNavigator::Closed,
        }
    }

    /// Forwards a reaction to the catalog; the lightbox position is untouched.
    pub fn react(&self, catalog: &mut MediaCatalog, id: &str, reaction: Reaction) -> bool {
        catalog.react(id, reaction)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SourceConfig;
    use crate::reactions::ReactionStore;
    use crate::sort::{self, SortMode};
    use crate::storage::Store;

    fn sequence(names: &[&str]) -> Vec<MediaItem> {
        names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let mut item = MediaItem::seed(idx, &format!("https://example.com/{name}"));
                item.id = name.to_string();
                item.name = Some(name.to_string());
                item.size_bytes = Some(idx as u64);
                item
            })
            .collect()
    }

    #[test]
    fn starts_closed() {
        let nav = GalleryNavigator::default();
        assert!(!nav.is_open());
        assert_eq!(nav.index(), None);
    }

    #[test]
    fn open_requires_valid_index() {
        let items = sequence(&["a", "b"]);
        let mut nav = GalleryNavigator::default();
        assert!(!nav.open(2, &items));
        assert!(!nav.is_open());
        assert!(nav.open(1, &items));
        assert_eq!(nav.current(&items).map(|i| i.id.as_str()), Some("b"));
    }

    #[test]
    fn wraps_in_both_directions() {
        let items = sequence(&["a", "b", "c"]);
        let mut nav = GalleryNavigator::default();
        nav.open(2, &items);
        nav.next(&items);
        assert_eq!(nav.index(), Some(0));
        nav.prev(&items);
        assert_eq!(nav.index(), Some(2));
        nav.prev(&items);
        assert_eq!(nav.index(), Some(1));
    }

    #[test]
    fn single_item_wraps_onto_itself() {
        let items = sequence(&["only"]);
        let mut nav = GalleryNavigator::default();
        nav.open(0, &items);
        nav.next(&items);
        nav.prev(&items);
        assert_eq!(nav.index(), Some(0));
    }

    #[test]
    fn stepping_while_closed_does_nothing() {
        let items = sequence(&["a", "b"]);
        let mut nav = GalleryNavigator::default();
        nav.next(&items);
        nav.prev(&items);
        assert_eq!(nav, GalleryNavigator::Closed);
    }

    #[test]
    fn close_is_idempotent() {
        let items = sequence(&["a"]);
        let mut nav = GalleryNavigator::default();
        nav.close();
        nav.open(0, &items);
        nav.close();
        nav.close();
        assert!(!nav.is_open());
    }

    #[test]
    fn follows_item_across_sort_change() {
        let items = sequence(&["apple", "banana", "cherry"]);
        let mut nav = GalleryNavigator::default();
        let by_name = sort::sort(&items, SortMode::NameAsc);
        nav.open(0, &by_name);

        let reversed = sort::sort(&items, SortMode::NameDesc);
        nav.resync(&reversed);
        assert_eq!(nav.index(), Some(2));
        assert_eq!(nav.current(&reversed).map(|i| i.id.as_str()), Some("apple"));
    }

    #[test]
    fn closes_when_item_disappears() {
        let items = sequence(&["a", "b"]);
        let mut nav = GalleryNavigator::default();
        nav.open(1, &items);
        nav.resync(&items[..1]);
        assert!(!nav.is_open());
    }

    #[test]
    fn react_leaves_position_alone() {
        let source = SourceConfig {
            folder: String::new(),
            credential: String::new(),
            fallback_items: sequence(&["a", "b"]),
        };
        let reactions = Arc::new(ReactionStore::new(Store::open_in_memory().unwrap()));
        let mut catalog = MediaCatalog::new(None, reactions);
        catalog.initialize(&source);

        let mut nav = GalleryNavigator::default();
        nav.open(1, catalog.items());
        let before = nav.clone();
        assert!(nav.react(&mut catalog, "b", Reaction::Like));
        assert_eq!(nav, before);
        assert_eq!(catalog.totals().likes, 1);
    }
}
