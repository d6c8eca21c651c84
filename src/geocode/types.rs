//! Core types for the geocoding subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A validated, non-empty free-text address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressQuery(String);

impl AddressQuery {
    /// Trim and validate. Empty or whitespace-only input is rejected.
    pub fn new(raw: &str) -> Result<Self, GeocodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GeocodeError::InvalidInput(
                "address must not be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AddressQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// 0.0/0.0 is legal but almost always means a provider returned garbage.
    pub fn is_null_island(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// Inclusive lat/lon box used to reject far-away public geocoder hits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// South Korea, generously.
    pub const KOREA: BoundingBox = BoundingBox {
        min_lat: 33.0,
        max_lat: 43.0,
        min_lon: 124.0,
        max_lon: 132.0,
    };

    pub fn contains(&self, c: Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&c.lat)
            && (self.min_lon..=self.max_lon).contains(&c.lon)
    }
}

/// Which stage of the chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    PrimaryDirect,
    PrimaryProxy,
    SecondaryPublic,
    StaticFallback,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryDirect => "primary_direct",
            Self::PrimaryProxy => "primary_proxy",
            Self::SecondaryPublic => "secondary_public",
            Self::StaticFallback => "static_fallback",
        }
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coordinate as reported by one live provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHit {
    pub coords: Coordinates,
    /// Address as normalized by the provider, if it echoed one.
    pub echo: Option<String>,
}

/// One failed stage, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub method: ResolutionMethod,
    /// Stage label, e.g. `vworld-proxy#2`.
    pub stage: String,
    pub reason: String,
}

/// The outcome of one `resolve` call. Always produced for valid input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub latitude: f64,
    pub longitude: f64,
    pub method: ResolutionMethod,
    pub raw_address_echo: String,
    pub succeeded: bool,
    /// Landmark keyword the static stage matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<StageFailure>,
}

impl ResolutionResult {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// True when downstream consumers should ask for a manual correction.
    pub fn needs_review(&self) -> bool {
        !self.succeeded || self.coordinates().is_null_island()
    }
}

/// Errors visible to callers of the resolver.
#[derive(Debug, Error, PartialEq)]
pub enum GeocodeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Why a single stage gave up. Never leaves the resolver.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderUnavailable {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {0}")]
    Status(u16),

    /// The provider answered but declined (e.g. V-World `NOT_FOUND`).
    #[error("provider rejected query: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no candidate inside the configured region")]
    OutOfRegion,
}
