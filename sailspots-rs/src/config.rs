use std::path::{Path, PathBuf};

use tether::{Category, Coordinate, DistanceUnit, SearchRequest};

/// Radii offered to the user, in the configured unit.
pub const RADIUS_OPTIONS: [f64; 3] = [10.0, 20.0, 30.0];

/// Initial camera target: Miami.
pub const DEFAULT_CENTER: Coordinate = Coordinate {
    latitude: 25.7617,
    longitude: -80.1918,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },
    #[error("{0} not set")]
    MissingVar(&'static str),
    #[error("radius {0} is not one of the offered options")]
    UnsupportedRadius(f64),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub distance_unit: DistanceUnit,
    /// In `distance_unit`. Must be one of [`RADIUS_OPTIONS`].
    pub radius: f64,
    pub default_center: Coordinate,
    pub default_category: Category,
    pub places_api_key: Option<String>,
    pub cache_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            distance_unit: DistanceUnit::Miles,
            radius: RADIUS_OPTIONS[0],
            default_center: DEFAULT_CENTER,
            default_category: Category::Marinas,
            places_api_key: None,
            cache_path: None,
        }
    }
}

impl SessionConfig {
    /// `.env`, then the JSON file named by `SAILSPOTS_CONFIG`, then individual variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var_os("SAILSPOTS_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SessionConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        var: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = var("SAILSPOTS_USE_KM") {
            self.distance_unit = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => DistanceUnit::Kilometers,
                "0" | "false" | "no" => DistanceUnit::Miles,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "SAILSPOTS_USE_KM",
                        value,
                    });
                }
            };
        }
        if let Some(key) = var("SAILSPOTS_PLACES_API_KEY").filter(|key| !key.trim().is_empty()) {
            self.places_api_key = Some(key);
        }
        if let Some(path) = var("SAILSPOTS_CACHE_PATH").filter(|path| !path.trim().is_empty()) {
            self.cache_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !RADIUS_OPTIONS.contains(&self.radius) {
            return Err(ConfigError::UnsupportedRadius(self.radius));
        }
        Ok(())
    }

    pub fn set_radius(&mut self, radius: f64) -> Result<(), ConfigError> {
        if !RADIUS_OPTIONS.contains(&radius) {
            return Err(ConfigError::UnsupportedRadius(radius));
        }
        self.radius = radius;
        Ok(())
    }

    pub fn radius_meters(&self) -> f64 {
        self.distance_unit.to_meters(self.radius)
    }

    pub fn format_distance(&self, meters: f64) -> String {
        self.distance_unit.format(meters)
    }

    /// A search around `center` (or the default center) with the configured radius.
    pub fn search_request(
        &self,
        center: Option<Coordinate>,
        category: Option<Category>,
    ) -> SearchRequest {
        SearchRequest {
            center: center.unwrap_or(self.default_center),
            radius_meters: self.radius_meters(),
            category: category.unwrap_or(self.default_category),
        }
    }
}
