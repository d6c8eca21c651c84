//! Resolver configuration.
//!
//! Everything the chain needs is carried in [`ResolverConfig`] and handed to the
//! resolver at construction. Only the binary reads the process environment,
//! through [`ResolverConfig::from_env`].

use super::types::{BoundingBox, Coordinates};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_PRIMARY_ENDPOINT: &str = "https://api.vworld.kr/req/address";
pub const DEFAULT_SECONDARY_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_USER_AGENT: &str = "ListingGeocoder/0.3 (property-listing backend)";
pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 5_000;

/// Seoul City Hall.
pub const DEFAULT_FALLBACK: Coordinates = Coordinates::new(37.5665, 126.9780);

/// V-World `type` parameter: road-name or lot-number addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    #[default]
    Road,
    Parcel,
}

impl AddressType {
    pub fn as_param(&self) -> &'static str {
        match self {
            Self::Road => "road",
            Self::Parcel => "parcel",
        }
    }
}

/// A keyword the static stage can match inside an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub keyword: String,
    pub coords: Coordinates,
}

struct BuiltinLandmark {
    keyword: &'static str,
    lat: f64,
    lon: f64,
}

const BUILTIN_LANDMARKS: &[BuiltinLandmark] = &[
    BuiltinLandmark { keyword: "테헤란로", lat: 37.4979, lon: 127.0276 },
    BuiltinLandmark { keyword: "강남구", lat: 37.4979, lon: 127.0276 },
    BuiltinLandmark { keyword: "강남", lat: 37.4979, lon: 127.0276 },
    BuiltinLandmark { keyword: "서초구", lat: 37.4833, lon: 127.0276 },
    BuiltinLandmark { keyword: "서초", lat: 37.4833, lon: 127.0276 },
    BuiltinLandmark { keyword: "서울특별시", lat: 37.5665, lon: 126.9780 },
    BuiltinLandmark { keyword: "서울시", lat: 37.5665, lon: 126.9780 },
    BuiltinLandmark { keyword: "서울", lat: 37.5665, lon: 126.9780 },
    BuiltinLandmark { keyword: "종로구", lat: 37.5703, lon: 126.9784 },
    BuiltinLandmark { keyword: "종로", lat: 37.5703, lon: 126.9784 },
    BuiltinLandmark { keyword: "중구", lat: 37.5640, lon: 126.9996 },
    BuiltinLandmark { keyword: "마포구", lat: 37.5637, lon: 126.9015 },
    BuiltinLandmark { keyword: "영등포구", lat: 37.5264, lon: 126.8963 },
    BuiltinLandmark { keyword: "부산", lat: 35.1796, lon: 129.0756 },
    BuiltinLandmark { keyword: "대구", lat: 35.8714, lon: 128.6014 },
    BuiltinLandmark { keyword: "인천", lat: 37.4563, lon: 126.7052 },
    BuiltinLandmark { keyword: "경기도", lat: 37.4138, lon: 127.2018 },
    BuiltinLandmark { keyword: "수원", lat: 37.2636, lon: 127.0286 },
    BuiltinLandmark { keyword: "성남", lat: 37.4449, lon: 127.1378 },
    BuiltinLandmark { keyword: "고양", lat: 37.6564, lon: 126.8577 },
];

/// The built-in Seoul-area landmark table. Not part of the default config;
/// enable it with [`ResolverConfig::with_builtin_landmarks`].
pub fn default_landmarks() -> Vec<Landmark> {
    BUILTIN_LANDMARKS
        .iter()
        .map(|l| Landmark {
            keyword: l.keyword.to_string(),
            coords: Coordinates::new(l.lat, l.lon),
        })
        .collect()
}

/// Everything the resolution chain depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// V-World key. Without it both primary stages are skipped.
    pub primary_api_key: Option<String>,
    pub primary_endpoint: String,
    pub address_type: AddressType,
    /// Relays tried in order after the direct call.
    pub proxy_endpoints: Vec<String>,
    pub secondary_enabled: bool,
    pub secondary_endpoint: String,
    /// Nominatim `countrycodes` filter.
    pub country_codes: Option<String>,
    /// Public geocoder hits outside this box are discarded.
    pub region: Option<BoundingBox>,
    /// Zero is treated as unset and falls back to the default.
    pub stage_timeout_ms: u64,
    pub fallback: Coordinates,
    /// Keywords checked before `fallback`. Empty means the static stage always
    /// answers with `fallback`.
    pub landmarks: Vec<Landmark>,
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary_api_key: None,
            primary_endpoint: DEFAULT_PRIMARY_ENDPOINT.to_string(),
            address_type: AddressType::Road,
            proxy_endpoints: Vec::new(),
            secondary_enabled: true,
            secondary_endpoint: DEFAULT_SECONDARY_ENDPOINT.to_string(),
            country_codes: Some("kr".to_string()),
            region: Some(BoundingBox::KOREA),
            stage_timeout_ms: DEFAULT_STAGE_TIMEOUT_MS,
            fallback: DEFAULT_FALLBACK,
            landmarks: Vec::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn stage_timeout(&self) -> Duration {
        match self.stage_timeout_ms {
            0 => Duration::from_millis(DEFAULT_STAGE_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    /// Match the built-in landmark table before the fallback coordinate.
    pub fn with_builtin_landmarks(mut self) -> Self {
        self.landmarks = default_landmarks();
        self
    }

    /// Keep only the static stage.
    pub fn offline(mut self) -> Self {
        self.primary_api_key = None;
        self.proxy_endpoints.clear();
        self.secondary_enabled = false;
        self
    }

    /// Build from `VWORLD_*` / `NOMINATIM_*` / `GEOCODE_*` variables, loading
    /// `.env` first if present.
    ///
    /// The built-in landmark table is enabled unless an explicit fallback
    /// coordinate is set; `GEOCODE_LANDMARKS=builtin|off` overrides that.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_vars(non_empty_var)
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        cfg.primary_api_key = var("VWORLD_API_KEY");
        if let Some(url) = var("VWORLD_ENDPOINT") {
            cfg.primary_endpoint = url;
        }
        if let Some(t) = var("VWORLD_ADDRESS_TYPE") {
            cfg.address_type = match t.to_lowercase().as_str() {
                "road" => AddressType::Road,
                "parcel" => AddressType::Parcel,
                other => anyhow::bail!("VWORLD_ADDRESS_TYPE must be road or parcel, got '{}'", other),
            };
        }
        if let Some(list) = var("VWORLD_PROXY_URLS") {
            cfg.proxy_endpoints = split_list(&list);
        }
        if let Some(url) = var("NOMINATIM_ENDPOINT") {
            cfg.secondary_endpoint = url;
        }
        if let Some(secs) = var("GEOCODE_TIMEOUT_SECS") {
            let secs: f64 = secs
                .parse()
                .context("GEOCODE_TIMEOUT_SECS must be a number")?;
            cfg.stage_timeout_ms =
                timeout_ms_from_secs(secs).context("invalid GEOCODE_TIMEOUT_SECS")?;
        }

        let explicit_fallback = match (var("GEOCODE_FALLBACK_LAT"), var("GEOCODE_FALLBACK_LON")) {
            (Some(lat), Some(lon)) => {
                cfg.fallback = Coordinates::new(
                    lat.parse().context("GEOCODE_FALLBACK_LAT must be a number")?,
                    lon.parse().context("GEOCODE_FALLBACK_LON must be a number")?,
                );
                true
            }
            (None, None) => false,
            _ => anyhow::bail!("GEOCODE_FALLBACK_LAT and GEOCODE_FALLBACK_LON must be set together"),
        };

        let builtin = match var("GEOCODE_LANDMARKS").map(|v| v.to_lowercase()) {
            None => !explicit_fallback,
            Some(v) if v == "builtin" => true,
            Some(v) if v == "off" => false,
            Some(other) => anyhow::bail!("GEOCODE_LANDMARKS must be builtin or off, got '{}'", other),
        };
        if builtin {
            cfg.landmarks = default_landmarks();
        }

        Ok(cfg)
    }
}

/// Seconds (as given on the command line or in the environment) to a stage
/// timeout in milliseconds. Must be finite and positive.
pub fn timeout_ms_from_secs(secs: f64) -> Result<u64> {
    anyhow::ensure!(
        secs.is_finite() && secs > 0.0,
        "timeout must be a positive number of seconds, got {}",
        secs
    );
    Ok(((secs * 1000.0).round() as u64).max(1))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Comma separated list, blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// First four characters of a secret, for logs.
pub fn redact(secret: &str) -> String {
    let head: String = secret.chars().take(4).collect();
    format!("{}…", head)
}
