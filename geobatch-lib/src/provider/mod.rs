//! Geocoding provider access.
//!
//! `Geocoder` is the seam the dispatcher drives; `GeocodeClient` implements it
//! over HTTP, and `payload` turns provider JSON into a coordinate.

/// HTTP client for the provider
pub mod client;

/// Provider response parsing
pub mod payload;

pub use client::GeocodeClient;
pub use payload::extract_coordinate;

use crate::error::GeocodeFailure;
use crate::types::{Coordinate, LocationKey};
use std::future::Future;

/// One request/response cycle against a geocoding service.
///
/// Implementations must not touch shared run state: the outcome is returned
/// and the caller records it.
pub trait Geocoder {
    fn resolve(
        &self,
        key: &LocationKey,
    ) -> impl Future<Output = Result<Coordinate, GeocodeFailure>> + Send;
}

impl<G: Geocoder + Sync> Geocoder for &G {
    fn resolve(
        &self,
        key: &LocationKey,
    ) -> impl Future<Output = Result<Coordinate, GeocodeFailure>> + Send {
        (**self).resolve(key)
    }
}
