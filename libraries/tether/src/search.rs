//! Turning raw nearby-search candidates into places the engine will accept.
//!
//! The provider's own classification is coarse (docks come back as marinas, yacht clubs as anything),
//! so we re-check every candidate against keyword lists for the category the user asked for.

use crate::data_model::{Coordinate, Place};

pub const METERS_IN_MILE: f64 = 1609.34;
pub const METERS_IN_KM: f64 = 1000.0;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Category {
    #[default]
    Marinas,
    Docks,
    Beaches,
}

impl Category {
    /// Primary place types to ask the provider for.
    pub fn primary_types(&self) -> &'static [&'static str] {
        match self {
            Category::Beaches => &["beach"],
            // docks are filed under marina by the provider
            Category::Marinas | Category::Docks => &["marina"],
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Category::Marinas => &["marina", "yacht", "harbor", "harbour"],
            Category::Docks => &["dock", "pier", "landing", "boat ramp"],
            Category::Beaches => &["beach"],
        }
    }

    /// Does the name or address look like this category?
    pub fn matches(&self, name: &str, address: &str) -> bool {
        let name = name.to_lowercase();
        let address = address.to_lowercase();
        self.keywords()
            .iter()
            .any(|keyword| name.contains(keyword) || address.contains(keyword))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Marinas => "marinas",
            Category::Docks => "docks",
            Category::Beaches => "beaches",
        }
    }

    /// Lenient parse used for stored records. Anything unrecognised is a dock,
    /// which also covers older "ramp" rows.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "marina" | "marinas" => Category::Marinas,
            "beach" | "beaches" => Category::Beaches,
            _ => Category::Docks,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Category::Marinas => "Marinas",
            Category::Docks => "Docks",
            Category::Beaches => "Beaches",
        };
        f.write_str(label)
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum DistanceUnit {
    #[default]
    Miles,
    Kilometers,
}

impl DistanceUnit {
    pub fn meters_per_unit(&self) -> f64 {
        match self {
            DistanceUnit::Miles => METERS_IN_MILE,
            DistanceUnit::Kilometers => METERS_IN_KM,
        }
    }

    pub fn to_meters(&self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    pub fn from_meters(&self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            DistanceUnit::Miles => "mi",
            DistanceUnit::Kilometers => "km",
        }
    }

    /// e.g. "3.4 mi"
    pub fn format(&self, meters: f64) -> String {
        format!("{:.1} {}", self.from_meters(meters), self.suffix())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchRequest {
    pub center: Coordinate,
    pub radius_meters: f64,
    pub category: Category,
}

/// A candidate as the provider returned it. Any field may be missing.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlaceCandidate {
    pub id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub coordinate: Option<Coordinate>,
    pub primary_type: Option<String>,
}

/// Drop unusable candidates, apply the category heuristics, and attach the distance from the search center.
/// Provider order (relevance/distance) is preserved.
pub fn prepare_results(candidates: Vec<PlaceCandidate>, request: &SearchRequest) -> Vec<Place> {
    let total = candidates.len();
    let mut unusable = 0;

    let places: Vec<Place> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let PlaceCandidate {
                id,
                name,
                address,
                coordinate,
                primary_type: _,
            } = candidate;

            let (Some(id), Some(name), Some(coordinate)) = (id, name, coordinate) else {
                unusable += 1;
                return None;
            };
            if id.trim().is_empty() {
                unusable += 1;
                return None;
            }

            let address = address.unwrap_or_default();
            if !request.category.matches(&name, &address) {
                return None;
            }

            let distance = request.center.distance_meters(&coordinate);
            Some(
                Place::new(id, name, address, Some(coordinate), request.category)
                    .with_distance_meters(distance),
            )
        })
        .collect();

    if unusable > 0 {
        log::warn!("Dropped {unusable} of {total} candidates missing an id, name or coordinate");
    }
    log::debug!(
        "Found {} places for filter={}",
        places.len(),
        request.category
    );

    places
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: Option<&str>, name: &str, address: &str) -> PlaceCandidate {
        PlaceCandidate {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            address: Some(address.to_string()),
            coordinate: Some(Coordinate::new(25.77, -80.18)),
            primary_type: Some("marina".to_string()),
        }
    }

    fn request(category: Category) -> SearchRequest {
        SearchRequest {
            center: Coordinate::new(25.7617, -80.1918),
            radius_meters: DistanceUnit::Miles.to_meters(10.0),
            category,
        }
    }

    #[test]
    fn test_keyword_heuristics() {
        assert!(Category::Marinas.matches("Miamarina at Bayside", ""));
        assert!(Category::Marinas.matches("Coconut Grove Sailing Club", "Harbour Dr"));
        assert!(!Category::Marinas.matches("Bayfront Park", "301 Biscayne Blvd"));
        assert!(Category::Docks.matches("Haulover BOAT RAMP", ""));
        assert!(Category::Docks.matches("Pier 5", ""));
        assert!(Category::Beaches.matches("Crandon Park", "Beach Rd"));
        assert!(!Category::Beaches.matches("Pier 5", ""));
    }

    #[test]
    fn test_primary_types() {
        assert_eq!(Category::Beaches.primary_types(), &["beach"]);
        assert_eq!(Category::Docks.primary_types(), &["marina"]);
        assert_eq!(Category::Marinas.primary_types(), &["marina"]);
    }

    #[test]
    fn test_prepare_drops_unusable_and_filters_by_category() {
        let mut no_coordinate = candidate(Some("c"), "Rickenbacker Marina", "");
        no_coordinate.coordinate = None;

        let candidates = vec![
            candidate(Some("a"), "Dinner Key Marina", "3400 Pan American Dr"),
            candidate(None, "Sea Isle Marina", ""),
            candidate(Some(""), "Nameless Marina", ""),
            no_coordinate,
            candidate(Some("d"), "Bayfront Park", "301 Biscayne Blvd"),
            candidate(Some("e"), "Miami Yacht Club", "1001 MacArthur Cswy"),
        ];

        let places = prepare_results(candidates, &request(Category::Marinas));
        let ids: Vec<&str> = places.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["a", "e"]);
        assert!(places.iter().all(|p| p.category() == Category::Marinas));
        assert!(places.iter().all(|p| p.distance_meters().is_some()));
    }

    #[test]
    fn test_distance_units() {
        assert_eq!(DistanceUnit::Kilometers.to_meters(10.0), 10_000.0);
        assert!((DistanceUnit::Miles.from_meters(1609.34) - 1.0).abs() < 1e-9);
        assert_eq!(DistanceUnit::Kilometers.format(3_460.0), "3.5 km");
    }

    #[test]
    fn test_category_from_tag() {
        assert_eq!(Category::from_tag("MARINA"), Category::Marinas);
        assert_eq!(Category::from_tag(" beach "), Category::Beaches);
        assert_eq!(Category::from_tag("ramp"), Category::Docks);
    }
}
