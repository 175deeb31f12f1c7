//! # Data model
//! Places come from search, favorite records come from the registry, and presentation items are what the views render.
//! Presentation items are only ever built by the engine; a view that wants to show a spot asks the engine for one.

mod diff;

pub use diff::{ItemDiff, ListDiff};

use crate::search::Category;

pub type PlaceId = String;

/// The authoritative set of favorited identifiers, as last pushed by the registry.
/// `im` keeps the copy we hold for rollback and the copy handed to listeners cheap.
pub type FavoriteIds = im::HashSet<PlaceId>;

slotmap::new_key_type! {
    pub struct ListenerKey;
}

/// Mean Earth radius in meters (IUGG).
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance using the haversine formula.
    pub fn distance_meters(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// A search candidate that survived filtering. Immutable once built.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Place {
    id: PlaceId,
    name: String,
    address: String,
    coordinate: Option<Coordinate>,
    category: Category,
    distance_meters: Option<f64>,
}

impl Place {
    pub fn new(
        id: impl Into<PlaceId>,
        name: impl Into<String>,
        address: impl Into<String>,
        coordinate: Option<Coordinate>,
        category: Category,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            coordinate,
            category,
            distance_meters: None,
        }
    }

    pub fn with_distance_meters(self, distance_meters: f64) -> Self {
        Self {
            distance_meters: Some(distance_meters),
            ..self
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        self.coordinate
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn distance_meters(&self) -> Option<f64> {
        self.distance_meters
    }

    pub(crate) fn has_identifier(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// A favorite as stored in the registry and mirrored into the local cache.
///
/// There is no stored "false": a spot that is not a favorite has no record at all.
/// Records are replaced whole on conflict, never patched field by field.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FavoriteRecord {
    pub id: PlaceId,
    pub name: String,
    pub address: String,
    pub category: Category,
    pub coordinate: Option<Coordinate>,
}

impl FavoriteRecord {
    pub fn from_place(place: &Place) -> Self {
        Self {
            id: place.id.clone(),
            name: place.name.clone(),
            address: place.address.clone(),
            category: place.category,
            coordinate: place.coordinate,
        }
    }

    /// Always true. Kept so callers writing the flag out don't have to invent it.
    pub fn is_favorite(&self) -> bool {
        true
    }

    pub(crate) fn into_place(self) -> Place {
        Place::new(
            self.id,
            self.name,
            self.address,
            self.coordinate,
            self.category,
        )
    }
}

/// A place plus its derived favorite flag. The only type views ever receive.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct PresentationItem {
    place: Place,
    is_favorite: bool,
}

impl PresentationItem {
    pub(crate) fn new(place: Place, is_favorite: bool) -> Self {
        Self { place, is_favorite }
    }

    pub fn place(&self) -> &Place {
        &self.place
    }

    pub fn id(&self) -> &str {
        self.place.id()
    }

    pub fn name(&self) -> &str {
        self.place.name()
    }

    pub fn address(&self) -> &str {
        self.place.address()
    }

    pub fn is_favorite(&self) -> bool {
        self.is_favorite
    }

    /// Both identifiers equal and non-empty.
    pub fn same_entity(&self, other: &PresentationItem) -> bool {
        self.place.has_identifier() && other.place.has_identifier() && self.id() == other.id()
    }

    /// Name, address and favorite flag all equal.
    pub fn contents_equal(&self, other: &PresentationItem) -> bool {
        self.details_equal(other) && self.is_favorite == other.is_favorite
    }

    fn details_equal(&self, other: &PresentationItem) -> bool {
        self.place.name == other.place.name
            && self.place.address == other.place.address
            && self.place.category == other.place.category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, name: &str, favorite: bool) -> PresentationItem {
        PresentationItem::new(
            Place::new(id, name, "1 Harbor Rd", None, Category::Marinas),
            favorite,
        )
    }

    #[test]
    fn test_same_entity_requires_non_empty_ids() {
        assert!(item("a", "Dock A", false).same_entity(&item("a", "Renamed", true)));
        assert!(!item("", "Dock A", false).same_entity(&item("", "Dock A", false)));
        assert!(!item("a", "Dock A", false).same_entity(&item("b", "Dock A", false)));
    }

    #[test]
    fn test_contents_equal_includes_favorite_flag() {
        assert!(item("a", "Dock A", true).contents_equal(&item("a", "Dock A", true)));
        assert!(!item("a", "Dock A", true).contents_equal(&item("a", "Dock A", false)));
        assert!(!item("a", "Dock A", true).contents_equal(&item("a", "Dock B", true)));
    }

    #[test]
    fn test_record_round_trips_place_fields() {
        let place = Place::new(
            "abc",
            "Crandon Marina",
            "5420 Crandon Blvd",
            Some(Coordinate::new(25.72, -80.16)),
            Category::Marinas,
        );
        let record = FavoriteRecord::from_place(&place);
        assert!(record.is_favorite());
        assert_eq!(record.clone().into_place(), place);
    }

    #[test]
    fn test_distance_miami_to_key_biscayne() {
        let miami = Coordinate::new(25.7617, -80.1918);
        let key_biscayne = Coordinate::new(25.6932, -80.1625);
        let meters = miami.distance_meters(&key_biscayne);
        // roughly 8.2 km
        assert!((8_000.0..8_400.0).contains(&meters), "got {meters}");
        assert_eq!(miami.distance_meters(&miami), 0.0);
    }
}
