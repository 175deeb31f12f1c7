use std::collections::{HashMap, HashSet};

use super::{PlaceId, PresentationItem};

/// How a view should treat one row relative to the previous emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ItemDiff {
    Unchanged,
    /// Only the favorite indicator needs redrawing.
    FavoriteOnly,
    /// New entity, or its details changed.
    FullRefresh,
}

impl ItemDiff {
    pub fn between(old: &PresentationItem, new: &PresentationItem) -> Self {
        if !old.same_entity(new) || !old.details_equal(new) {
            ItemDiff::FullRefresh
        } else if old.is_favorite() != new.is_favorite() {
            ItemDiff::FavoriteOnly
        } else {
            ItemDiff::Unchanged
        }
    }
}

/// Row-level changes between two emissions. `changes` lines up with the new list.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ListDiff {
    pub changes: Vec<ItemDiff>,
    pub removed: Vec<PlaceId>,
    /// Rows present in both lists whose order relative to the other kept rows changed, in new-list order.
    pub moved: Vec<PlaceId>,
}

impl ListDiff {
    pub fn between<'a>(
        previous: impl IntoIterator<Item = &'a PresentationItem>,
        next: impl IntoIterator<Item = &'a PresentationItem>,
    ) -> Self {
        let mut previous_by_id: HashMap<&str, &PresentationItem> = HashMap::new();
        let mut previous_order = Vec::new();
        for item in previous {
            if previous_by_id.insert(item.id(), item).is_none() {
                previous_order.push(item.id());
            }
        }

        let mut changes = Vec::new();
        let mut seen = HashSet::new();
        let mut next_kept = Vec::new();
        for item in next {
            let change = match previous_by_id.get(item.id()) {
                Some(old) => {
                    if seen.insert(item.id()) {
                        next_kept.push(item.id());
                    }
                    ItemDiff::between(old, item)
                }
                None => ItemDiff::FullRefresh,
            };
            changes.push(change);
        }

        let (previous_kept, removed): (Vec<&str>, Vec<&str>) = previous_order
            .into_iter()
            .partition(|id| seen.contains(id));
        let moved = next_kept
            .iter()
            .zip(&previous_kept)
            .filter(|(next_id, previous_id)| next_id != previous_id)
            .map(|(next_id, _)| next_id.to_string())
            .collect();

        ListDiff {
            changes,
            removed: removed.into_iter().map(str::to_string).collect(),
            moved,
        }
    }

    /// Nothing a view would need to redraw, order included.
    pub fn is_unchanged(&self) -> bool {
        self.removed.is_empty()
            && self.moved.is_empty()
            && self.changes.iter().all(|c| *c == ItemDiff::Unchanged)
    }

    pub fn count(&self, kind: ItemDiff) -> usize {
        self.changes.iter().filter(|c| **c == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::Place;
    use crate::search::Category;

    fn item(id: &str, name: &str, favorite: bool) -> PresentationItem {
        PresentationItem::new(
            Place::new(id, name, "Pier 5", None, Category::Docks),
            favorite,
        )
    }

    #[test]
    fn test_item_diff_kinds() {
        let old = item("a", "Dock A", false);
        assert_eq!(ItemDiff::between(&old, &item("a", "Dock A", false)), ItemDiff::Unchanged);
        assert_eq!(ItemDiff::between(&old, &item("a", "Dock A", true)), ItemDiff::FavoriteOnly);
        assert_eq!(ItemDiff::between(&old, &item("a", "Dock Z", true)), ItemDiff::FullRefresh);
        assert_eq!(ItemDiff::between(&old, &item("b", "Dock A", false)), ItemDiff::FullRefresh);
    }

    #[test]
    fn test_list_diff_tracks_inserts_and_removals() {
        let previous = [item("a", "Dock A", false), item("b", "Dock B", true)];
        let next = [item("b", "Dock B", false), item("c", "Dock C", false)];

        let diff = ListDiff::between(&previous, &next);

        assert_eq!(diff.changes, vec![ItemDiff::FavoriteOnly, ItemDiff::FullRefresh]);
        assert_eq!(diff.removed, vec!["a".to_string()]);
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn test_reorder_is_not_unchanged() {
        let previous = [item("a", "Dock A", false), item("b", "Dock B", false)];
        let next = [item("b", "Dock B", false), item("a", "Dock A", false)];

        let diff = ListDiff::between(&previous, &next);

        assert_eq!(diff.changes, vec![ItemDiff::Unchanged, ItemDiff::Unchanged]);
        assert_eq!(diff.moved, vec!["b".to_string(), "a".to_string()]);
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn test_insertions_and_removals_alone_move_nothing() {
        let previous = [
            item("a", "Dock A", false),
            item("x", "Dock X", false),
            item("b", "Dock B", false),
        ];
        let next = [
            item("n", "Dock N", false),
            item("a", "Dock A", false),
            item("b", "Dock B", false),
        ];

        let diff = ListDiff::between(&previous, &next);

        assert!(diff.moved.is_empty());
        assert_eq!(diff.removed, vec!["x".to_string()]);
        assert_eq!(diff.changes[0], ItemDiff::FullRefresh);
    }

    #[test]
    fn test_identical_lists_are_unchanged() {
        let list = [item("a", "Dock A", false), item("b", "Dock B", true)];
        let diff = ListDiff::between(&list, &list);
        assert!(diff.is_unchanged());
        assert_eq!(diff.count(ItemDiff::Unchanged), 2);
    }
}
