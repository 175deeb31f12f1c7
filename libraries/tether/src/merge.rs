//! Pure merge of places and favorite membership into what views render.

use std::collections::HashSet;

use crate::data_model::{FavoriteIds, FavoriteRecord, Place, PresentationItem};

/// One item per place, in the order of `places`. Favorite status never reorders anything.
pub fn merge<'a>(
    places: impl IntoIterator<Item = &'a Place>,
    favorite_ids: &FavoriteIds,
) -> im::Vector<PresentationItem> {
    places
        .into_iter()
        .filter(|place| place.has_identifier())
        .map(|place| PresentationItem::new(place.clone(), favorite_ids.contains(place.id())))
        .collect()
}

/// Drops places without an identifier and any repeat of an identifier already seen.
/// The first occurrence wins since it ranked higher.
pub(crate) fn usable_places(places: impl IntoIterator<Item = Place>) -> im::Vector<Place> {
    let mut seen = HashSet::new();
    let mut missing_id = 0;
    let mut collisions = 0;

    let kept = places
        .into_iter()
        .filter(|place| {
            if !place.has_identifier() {
                missing_id += 1;
                return false;
            }
            if !seen.insert(place.id().to_string()) {
                collisions += 1;
                return false;
            }
            true
        })
        .collect();

    if missing_id > 0 {
        log::warn!("Dropped {missing_id} search results without an identifier");
    }
    if collisions > 0 {
        log::debug!("Dropped {collisions} search results with a repeated identifier");
    }

    kept
}

/// Items for the favorites screen, built from records fetched by identifier.
///
/// Only records whose identifier is still in `favorite_ids` survive: the fetch is async and the
/// set may have moved on while it ran. Sorted by name, ignoring case.
pub fn favorites_view(
    records: impl IntoIterator<Item = FavoriteRecord>,
    favorite_ids: &FavoriteIds,
) -> Vec<PresentationItem> {
    let mut seen = HashSet::new();
    let mut items: Vec<PresentationItem> = records
        .into_iter()
        .filter(|record| favorite_ids.contains(&record.id) && seen.insert(record.id.clone()))
        .map(|record| PresentationItem::new(record.into_place(), true))
        .collect();

    items.sort_by_cached_key(|item| item.name().to_lowercase());
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Category;

    fn place(id: &str, name: &str) -> Place {
        Place::new(id, name, "", None, Category::Docks)
    }

    fn ids(ids: &[&str]) -> FavoriteIds {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn flags(items: &im::Vector<PresentationItem>) -> Vec<(String, bool)> {
        items
            .iter()
            .map(|item| (item.id().to_string(), item.is_favorite()))
            .collect()
    }

    #[test]
    fn test_merge_is_pure() {
        let places = vec![place("a", "Dock A"), place("b", "Dock B")];
        let favorites = ids(&["b"]);
        assert_eq!(merge(&places, &favorites), merge(&places, &favorites));
    }

    #[test]
    fn test_merge_preserves_order_regardless_of_favorites() {
        let places = vec![place("c", "Dock C"), place("a", "Dock A"), place("b", "Dock B")];

        for favorites in [ids(&[]), ids(&["a"]), ids(&["b", "c"]), ids(&["a", "b", "c"])] {
            let merged = merge(&places, &favorites);
            let order: Vec<&str> = merged.iter().map(|item| item.id()).collect();
            assert_eq!(order, vec!["c", "a", "b"]);
        }
    }

    #[test]
    fn test_merge_derives_flag_from_membership() {
        let places = vec![place("a", "Dock A"), place("b", "Dock B")];
        let merged = merge(&places, &ids(&["b", "not-in-results"]));
        assert_eq!(
            flags(&merged),
            vec![("a".to_string(), false), ("b".to_string(), true)]
        );
    }

    #[test]
    fn test_usable_places_drops_empty_and_colliding_ids() {
        let kept = usable_places(vec![
            place("a", "First A"),
            place("", "No id"),
            place("  ", "Blank id"),
            place("a", "Second A"),
            place("b", "Dock B"),
        ]);
        let names: Vec<&str> = kept.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["First A", "Dock B"]);
    }

    #[test]
    fn test_favorites_view_filters_and_sorts() {
        let record = |id: &str, name: &str| FavoriteRecord {
            id: id.to_string(),
            name: name.to_string(),
            address: String::new(),
            category: Category::Marinas,
            coordinate: None,
        };

        let items = favorites_view(
            vec![
                record("z", "zebra marina"),
                record("gone", "Removed Meanwhile"),
                record("a", "Anchor Marina"),
                record("a", "Anchor Marina"),
            ],
            &ids(&["a", "z"]),
        );

        let names: Vec<&str> = items.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["Anchor Marina", "zebra marina"]);
        assert!(items.iter().all(|i| i.is_favorite()));
    }
}
