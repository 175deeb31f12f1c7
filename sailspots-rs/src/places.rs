//! Nearby search.

use tether::{Coordinate, PlaceCandidate, SearchRequest, SyncError};

use crate::config::{ConfigError, SessionConfig};

#[allow(async_fn_in_trait)]
pub trait SearchProvider {
    /// Raw candidates around `request.center`, in the provider's relevance order.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<PlaceCandidate>, SyncError>;
}

const NEARBY_ENDPOINT: &str = "https://places.googleapis.com/v1/places:searchNearby";
const FIELD_MASK: &str =
    "places.id,places.displayName,places.formattedAddress,places.location,places.primaryType";
/// The API refuses anything larger.
const MAX_RADIUS_METERS: f64 = 50_000.0;
const MAX_RESULTS: u32 = 20;

pub struct GooglePlacesProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl GooglePlacesProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: NEARBY_ENDPOINT.to_string(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .places_api_key
            .clone()
            .ok_or(ConfigError::MissingVar("SAILSPOTS_PLACES_API_KEY"))?;
        Ok(Self::new(api_key))
    }

    /// Point at a different server, e.g. a local proxy.
    pub fn with_endpoint(self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..self
        }
    }
}

fn request_body(request: &SearchRequest) -> serde_json::Value {
    serde_json::json!({
        "includedPrimaryTypes": request.category.primary_types(),
        "maxResultCount": MAX_RESULTS,
        "locationRestriction": {
            "circle": {
                "center": {
                    "latitude": request.center.latitude,
                    "longitude": request.center.longitude,
                },
                "radius": request.radius_meters.clamp(0.0, MAX_RADIUS_METERS),
            }
        }
    })
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct NearbyResponse {
    #[serde(default)]
    places: Vec<ApiPlace>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPlace {
    id: Option<String>,
    display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    location: Option<Coordinate>,
    primary_type: Option<String>,
}

#[derive(serde::Deserialize)]
struct LocalizedText {
    text: Option<String>,
}

impl From<ApiPlace> for PlaceCandidate {
    fn from(place: ApiPlace) -> Self {
        PlaceCandidate {
            id: place.id,
            name: place.display_name.and_then(|name| name.text),
            address: place.formatted_address,
            coordinate: place.location,
            primary_type: place.primary_type,
        }
    }
}

fn parse_response(body: &str) -> Result<Vec<PlaceCandidate>, SyncError> {
    let response: NearbyResponse = serde_json::from_str(body)
        .map_err(|e| SyncError::ProviderUnavailable(format!("malformed places response: {e}")))?;
    Ok(response.places.into_iter().map(PlaceCandidate::from).collect())
}

impl SearchProvider for GooglePlacesProvider {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<PlaceCandidate>, SyncError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| SyncError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::ProviderUnavailable(e.to_string()))?;

        if !status.is_success() {
            log::error!("Places search failed with {status}: {body}");
            return Err(SyncError::ProviderUnavailable(format!(
                "places search returned {status}"
            )));
        }

        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether::Category;

    #[test]
    fn test_request_body_clamps_radius() {
        let body = request_body(&SearchRequest {
            center: Coordinate::new(25.7617, -80.1918),
            radius_meters: 30.0 * 1609.34,
            category: Category::Beaches,
        });

        assert_eq!(body["includedPrimaryTypes"], serde_json::json!(["beach"]));
        let radius = body["locationRestriction"]["circle"]["radius"].as_f64().unwrap();
        assert!((radius - 48_280.2).abs() < 1e-6);

        let body = request_body(&SearchRequest {
            center: Coordinate::new(0.0, 0.0),
            radius_meters: 80_000.0,
            category: Category::Docks,
        });
        assert_eq!(body["locationRestriction"]["circle"]["radius"], 50_000.0);
        assert_eq!(body["includedPrimaryTypes"], serde_json::json!(["marina"]));
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "places": [
                {
                    "id": "ChIJ1",
                    "displayName": { "text": "Dinner Key Marina", "languageCode": "en" },
                    "formattedAddress": "3400 Pan American Dr, Miami, FL",
                    "location": { "latitude": 25.727, "longitude": -80.232 },
                    "primaryType": "marina"
                },
                { "displayName": { "text": "No Id Marina" } }
            ]
        }"#;

        let candidates = parse_response(body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id.as_deref(), Some("ChIJ1"));
        assert_eq!(candidates[0].name.as_deref(), Some("Dinner Key Marina"));
        assert_eq!(candidates[0].coordinate, Some(Coordinate::new(25.727, -80.232)));
        assert_eq!(candidates[1].id, None);
        assert_eq!(candidates[1].coordinate, None);
    }

    #[test]
    fn test_empty_and_malformed_responses() {
        assert_eq!(parse_response("{}").unwrap(), vec![]);
        assert!(matches!(
            parse_response("<html>"),
            Err(SyncError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_provider_unavailable() {
        // nothing listens on the discard port
        let provider = GooglePlacesProvider::new("key")
            .with_endpoint("http://127.0.0.1:9/v1/places:searchNearby");
        let result = provider
            .search(&SessionConfig::default().search_request(None, Some(Category::Docks)))
            .await;
        assert!(matches!(result, Err(SyncError::ProviderUnavailable(_))));
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut config = SessionConfig::default();
        assert!(matches!(
            GooglePlacesProvider::from_config(&config),
            Err(ConfigError::MissingVar(_))
        ));
        config.places_api_key = Some("key".to_string());
        assert!(GooglePlacesProvider::from_config(&config).is_ok());
    }
}
