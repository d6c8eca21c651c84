//! Geocoding stages: V-World direct, V-World through a relay, Nominatim, and
//! the static landmark fallback.

use super::config::{AddressType, Landmark, ResolverConfig};
use super::types::{
    AddressQuery, BoundingBox, Coordinates, ProviderHit, ProviderUnavailable, ResolutionMethod,
};
use serde::Deserialize;
use std::io;
use std::time::Duration;
use tracing::debug;

/// One live stage of the chain.
pub trait Provider: Send + Sync {
    /// Which result tag a success from this stage carries.
    fn method(&self) -> ResolutionMethod;

    /// Short stage name for logs and the failure ledger.
    fn label(&self) -> String;

    /// A single attempt. No internal retries.
    fn attempt(&self, query: &AddressQuery) -> Result<ProviderHit, ProviderUnavailable>;
}

// ─── HTTP plumbing ──────────────────────────────────────────────

/// Issue a prepared GET and return the body, folding every transport problem
/// into a `ProviderUnavailable`.
fn fetch_body(request: ureq::Request, timeout: Duration) -> Result<String, ProviderUnavailable> {
    let response = match request.timeout(timeout).call() {
        Ok(r) => r,
        Err(ureq::Error::Status(code, _)) => return Err(ProviderUnavailable::Status(code)),
        Err(ureq::Error::Transport(t)) => {
            return Err(if is_timeout(&t) {
                ProviderUnavailable::Timeout(timeout)
            } else {
                ProviderUnavailable::Network(t.to_string())
            });
        }
    };

    response.into_string().map_err(|e| {
        if is_timeout(&e) {
            ProviderUnavailable::Timeout(timeout)
        } else {
            ProviderUnavailable::Network(e.to_string())
        }
    })
}

/// Whether an error, or anything in its source chain, is an I/O timeout.
/// Socket read timeouts surface as `WouldBlock` on some platforms.
fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if matches!(io.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
            if let Some(inner) = io.get_ref() {
                current = Some(inner as &(dyn std::error::Error + 'static));
                continue;
            }
        }
        current = e.source();
    }
    false
}

/// V-World and Nominatim both send coordinates as strings; some relays re-encode
/// them as numbers.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum NumOrText {
    Num(f64),
    Text(String),
}

impl NumOrText {
    fn to_f64(&self, field: &str) -> Result<f64, ProviderUnavailable> {
        let v = match self {
            Self::Num(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                ProviderUnavailable::Malformed(format!("{} is not a number: '{}'", field, s))
            })?,
        };
        if v.is_finite() {
            Ok(v)
        } else {
            Err(ProviderUnavailable::Malformed(format!("{} is not finite", field)))
        }
    }
}

// ─── V-World ────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct VWorldEnvelope {
    response: VWorldResponse,
}

#[derive(Deserialize, Debug)]
struct VWorldResponse {
    status: String,
    #[serde(default)]
    refined: Option<VWorldRefined>,
    #[serde(default)]
    result: Option<VWorldResult>,
    #[serde(default)]
    error: Option<VWorldError>,
}

#[derive(Deserialize, Debug)]
struct VWorldRefined {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct VWorldResult {
    #[serde(default)]
    point: Option<VWorldPoint>,
}

#[derive(Deserialize, Debug)]
struct VWorldPoint {
    x: NumOrText,
    y: NumOrText,
}

#[derive(Deserialize, Debug)]
struct VWorldError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Parse a `getcoord` body. `x` is longitude, `y` latitude.
pub(crate) fn parse_vworld(body: &str) -> Result<ProviderHit, ProviderUnavailable> {
    let envelope: VWorldEnvelope = serde_json::from_str(body)
        .map_err(|e| ProviderUnavailable::Malformed(e.to_string()))?;
    let resp = envelope.response;

    if resp.status != "OK" {
        let detail = resp
            .error
            .map(|e| {
                format!(
                    "{} {}",
                    e.code.unwrap_or_default(),
                    e.text.unwrap_or_default()
                )
                .trim()
                .to_string()
            })
            .filter(|d| !d.is_empty());
        return Err(ProviderUnavailable::Rejected(match detail {
            Some(d) => format!("{}: {}", resp.status, d),
            None => resp.status,
        }));
    }

    let point = resp
        .result
        .and_then(|r| r.point)
        .ok_or_else(|| ProviderUnavailable::Malformed("status OK but no result.point".into()))?;

    let coords = Coordinates::new(point.y.to_f64("y")?, point.x.to_f64("x")?);
    let echo = resp
        .refined
        .and_then(|r| r.text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    Ok(ProviderHit { coords, echo })
}

fn vworld_request(
    agent: &ureq::Agent,
    endpoint: &str,
    api_key: &str,
    address_type: AddressType,
    query: &AddressQuery,
) -> ureq::Request {
    agent
        .get(endpoint)
        .query("service", "address")
        .query("request", "getcoord")
        .query("version", "2.0")
        .query("crs", "epsg:4326")
        .query("address", query.as_str())
        .query("format", "json")
        .query("type", address_type.as_param())
        .query("key", api_key)
}

/// Stage 1: call V-World directly.
pub struct VWorldDirect {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    address_type: AddressType,
    timeout: Duration,
}

impl VWorldDirect {
    pub fn new(agent: ureq::Agent, cfg: &ResolverConfig, api_key: String) -> Self {
        Self {
            agent,
            endpoint: cfg.primary_endpoint.clone(),
            api_key,
            address_type: cfg.address_type,
            timeout: cfg.stage_timeout(),
        }
    }
}

impl Provider for VWorldDirect {
    fn method(&self) -> ResolutionMethod {
        ResolutionMethod::PrimaryDirect
    }

    fn label(&self) -> String {
        "vworld-direct".into()
    }

    fn attempt(&self, query: &AddressQuery) -> Result<ProviderHit, ProviderUnavailable> {
        debug!(endpoint = %self.endpoint, "calling V-World directly");
        let req = vworld_request(&self.agent, &self.endpoint, &self.api_key, self.address_type, query);
        let body = fetch_body(req, self.timeout)?;
        parse_vworld(&body)
    }
}

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const VWORLD_REFERER: &str = "https://www.vworld.kr/";
const VWORLD_ORIGIN: &str = "https://www.vworld.kr";

/// Stage 2: the same V-World query through a relay that presents itself as a
/// browser. One instance per configured relay URL.
pub struct VWorldProxy {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    address_type: AddressType,
    timeout: Duration,
    ordinal: usize,
}

impl VWorldProxy {
    pub fn new(
        agent: ureq::Agent,
        cfg: &ResolverConfig,
        api_key: String,
        endpoint: String,
        ordinal: usize,
    ) -> Self {
        Self {
            agent,
            endpoint,
            api_key,
            address_type: cfg.address_type,
            timeout: cfg.stage_timeout(),
            ordinal,
        }
    }
}

impl Provider for VWorldProxy {
    fn method(&self) -> ResolutionMethod {
        ResolutionMethod::PrimaryProxy
    }

    fn label(&self) -> String {
        format!("vworld-proxy#{}", self.ordinal)
    }

    fn attempt(&self, query: &AddressQuery) -> Result<ProviderHit, ProviderUnavailable> {
        debug!(endpoint = %self.endpoint, "calling V-World through relay");
        let req = vworld_request(&self.agent, &self.endpoint, &self.api_key, self.address_type, query)
            .set("User-Agent", BROWSER_USER_AGENT)
            .set("Referer", VWORLD_REFERER)
            .set("Origin", VWORLD_ORIGIN)
            .set("Accept", "application/json, text/plain, */*")
            .set("Accept-Language", "ko-KR,ko;q=0.9,en;q=0.8");
        let body = fetch_body(req, self.timeout)?;
        parse_vworld(&body)
    }
}

// ─── Nominatim ──────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct NominatimItem {
    lat: NumOrText,
    lon: NumOrText,
    #[serde(default)]
    display_name: Option<String>,
}

/// Parse a Nominatim `search` array and pick the first candidate inside `region`.
pub(crate) fn parse_nominatim(
    body: &str,
    region: Option<BoundingBox>,
) -> Result<ProviderHit, ProviderUnavailable> {
    let items: Vec<NominatimItem> = serde_json::from_str(body)
        .map_err(|e| ProviderUnavailable::Malformed(e.to_string()))?;

    if items.is_empty() {
        return Err(ProviderUnavailable::Rejected("no results".into()));
    }

    for item in &items {
        let (lat, lon) = match (item.lat.to_f64("lat"), item.lon.to_f64("lon")) {
            (Ok(lat), Ok(lon)) => (lat, lon),
            _ => continue,
        };
        let coords = Coordinates::new(lat, lon);
        if region.is_some_and(|r| !r.contains(coords)) {
            debug!(lat, lon, "discarding Nominatim candidate outside region");
            continue;
        }
        return Ok(ProviderHit {
            coords,
            echo: item.display_name.clone(),
        });
    }

    Err(ProviderUnavailable::OutOfRegion)
}

/// Stage 3: OpenStreetMap Nominatim.
pub struct Nominatim {
    agent: ureq::Agent,
    endpoint: String,
    country_codes: Option<String>,
    region: Option<BoundingBox>,
    user_agent: String,
    timeout: Duration,
}

impl Nominatim {
    pub fn new(agent: ureq::Agent, cfg: &ResolverConfig) -> Self {
        Self {
            agent,
            endpoint: cfg.secondary_endpoint.clone(),
            country_codes: cfg.country_codes.clone(),
            region: cfg.region,
            user_agent: cfg.user_agent.clone(),
            timeout: cfg.stage_timeout(),
        }
    }
}

impl Provider for Nominatim {
    fn method(&self) -> ResolutionMethod {
        ResolutionMethod::SecondaryPublic
    }

    fn label(&self) -> String {
        "nominatim".into()
    }

    fn attempt(&self, query: &AddressQuery) -> Result<ProviderHit, ProviderUnavailable> {
        debug!(endpoint = %self.endpoint, "calling Nominatim");
        let mut req = self
            .agent
            .get(&self.endpoint)
            .query("q", query.as_str())
            .query("format", "json")
            .query("limit", "3")
            .query("addressdetails", "0")
            .query("accept-language", "ko,en")
            .set("User-Agent", &self.user_agent);
        if let Some(ref cc) = self.country_codes {
            req = req.query("countrycodes", cc);
        }
        let body = fetch_body(req, self.timeout)?;
        parse_nominatim(&body, self.region)
    }
}

// ─── Static fallback ────────────────────────────────────────────

/// Terminal stage. Picks the longest landmark keyword contained in the address,
/// otherwise the configured default point. Cannot fail.
pub struct StaticFallback {
    landmarks: Vec<Landmark>,
    default: Coordinates,
}

impl StaticFallback {
    pub fn new(cfg: &ResolverConfig) -> Self {
        let mut landmarks: Vec<Landmark> = cfg
            .landmarks
            .iter()
            .filter(|l| !l.keyword.trim().is_empty())
            .cloned()
            .collect();
        // Stable: equal lengths keep configured order.
        landmarks.sort_by_key(|l| std::cmp::Reverse(l.keyword.chars().count()));
        Self {
            landmarks,
            default: cfg.fallback,
        }
    }

    /// Coordinate plus the keyword that selected it, if any.
    pub fn locate(&self, query: &AddressQuery) -> (Coordinates, Option<String>) {
        self.landmarks
            .iter()
            .find(|l| query.as_str().contains(l.keyword.as_str()))
            .map(|l| (l.coords, Some(l.keyword.clone())))
            .unwrap_or((self.default, None))
    }
}
