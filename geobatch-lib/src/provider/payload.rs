//! Provider response parsing.
//!
//! Navigates the provider JSON with `serde_json::Value` rather than typed
//! structs: providers add fields freely, and the only thing that matters is
//! whether the first result carries a usable position.

use crate::error::GeocodeFailure;
use crate::types::{Coordinate, PayloadFormat};
use serde_json::Value;

/// Parse a raw response body into the first result's coordinate.
///
/// # Errors
///
/// - `Protocol` if the body is not JSON, lacks the results collection, or the
///   provider reports an error status
/// - `EmptyResult` if there are no results or the first has no geometry
pub fn extract_coordinate(body: &str, format: PayloadFormat) -> Result<Coordinate, GeocodeFailure> {
    let json: Value = serde_json::from_str(body)?;
    match format {
        PayloadFormat::Google => extract_google(&json),
        PayloadFormat::ArcGis => extract_arcgis(&json),
    }
}

fn extract_google(json: &Value) -> Result<Coordinate, GeocodeFailure> {
    if let Some(status) = json.get("status").and_then(|s| s.as_str()) {
        match status {
            "OK" => {}
            "ZERO_RESULTS" => return Err(GeocodeFailure::EmptyResult),
            other => {
                let detail = json
                    .get("error_message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("no detail");
                return Err(GeocodeFailure::protocol(format!(
                    "provider status {}: {}",
                    other, detail
                )));
            }
        }
    }

    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| GeocodeFailure::protocol("payload has no results collection"))?;

    results
        .first()
        .and_then(|first| first.get("geometry"))
        .and_then(|geometry| geometry.get("location"))
        .and_then(|location| number_pair(location, "lng", "lat"))
        .ok_or(GeocodeFailure::EmptyResult)
}

fn extract_arcgis(json: &Value) -> Result<Coordinate, GeocodeFailure> {
    if let Some(error) = json.get("error") {
        let detail = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no detail");
        return Err(GeocodeFailure::protocol(format!("provider error: {}", detail)));
    }

    let candidates = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .ok_or_else(|| GeocodeFailure::protocol("payload has no candidates collection"))?;

    candidates
        .first()
        .and_then(|first| first.get("location"))
        .and_then(|location| number_pair(location, "x", "y"))
        .ok_or(GeocodeFailure::EmptyResult)
}

fn number_pair(object: &Value, longitude: &str, latitude: &str) -> Option<Coordinate> {
    let longitude = object.get(longitude).and_then(|v| v.as_f64())?;
    let latitude = object.get(latitude).and_then(|v| v.as_f64())?;
    Coordinate::new(longitude, latitude)
}
