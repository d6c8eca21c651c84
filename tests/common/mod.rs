//! In-process mock of V-World, relays and Nominatim, served by axum on a
//! background runtime so the blocking resolver can call it over real HTTP.

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use listing_geocoder::geocode::{BoundingBox, Coordinates, ResolverConfig};
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

pub const DIRECT_PATH: &str = "/req/address";
pub const RELAY_A_PATH: &str = "/relay/a";
pub const RELAY_B_PATH: &str = "/relay/b";
pub const SEARCH_PATH: &str = "/search";

pub const TEST_KEY: &str = "TEST-VWORLD-KEY";

/// How a mocked route answers.
#[derive(Clone)]
pub enum Behavior {
    Json(String),
    Status(u16),
    Delayed(Duration, String),
}

/// One request the mock received.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

struct MockState {
    routes: HashMap<String, Behavior>,
    log: Mutex<Vec<Recorded>>,
}

pub struct MockProviders {
    pub base: String,
    state: Arc<MockState>,
}

impl MockProviders {
    pub fn start(routes: Vec<(&str, Behavior)>) -> Self {
        let state = Arc::new(MockState {
            routes: routes.into_iter().map(|(p, b)| (p.to_string(), b)).collect(),
            log: Mutex::new(Vec::new()),
        });
        let app = Router::new().fallback(handle).with_state(state.clone());
        let base = serve_in_background(app);
        Self { base, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn calls(&self, path: &str) -> usize {
        self.state.log.lock().unwrap().iter().filter(|r| r.path == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.log.lock().unwrap().len()
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    /// Config pointing every live stage at this mock. Relays are added by the
    /// caller.
    pub fn config(&self) -> ResolverConfig {
        ResolverConfig {
            primary_api_key: Some(TEST_KEY.to_string()),
            primary_endpoint: self.url(DIRECT_PATH),
            secondary_endpoint: self.url(SEARCH_PATH),
            stage_timeout_ms: 2_000,
            region: Some(BoundingBox::KOREA),
            ..Default::default()
        }
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    let headers = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    state.log.lock().unwrap().push(Recorded {
        path: path.clone(),
        params,
        headers,
    });

    let behavior = state.routes.get(&path).cloned();
    match behavior {
        Some(Behavior::Json(body)) => json(body),
        Some(Behavior::Status(code)) => {
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
        Some(Behavior::Delayed(delay, body)) => {
            tokio::time::sleep(delay).await;
            json(body)
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn json(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Serve `app` on 127.0.0.1 from a dedicated runtime thread; returns the base URL.
pub fn serve_in_background(app: Router) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock listener");
    listener.set_nonblocking(true).expect("nonblocking");
    let addr = listener.local_addr().expect("local addr");
    let (ready_tx, ready_rx) = mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("mock runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).expect("tokio listener");
            ready_tx.send(()).expect("signal ready");
            axum::serve(listener, app).await.expect("mock server");
        });
    });

    ready_rx.recv().expect("mock server ready");
    format!("http://{}", addr)
}

/// A V-World `getcoord` success body with string coordinates.
pub fn vworld_ok(x: f64, y: f64, refined: &str) -> String {
    serde_json::json!({
        "response": {
            "service": {"name": "address", "version": "2.0", "operation": "getcoord"},
            "status": "OK",
            "input": {"type": "road"},
            "refined": {"text": refined, "structure": {}},
            "result": {"crs": "EPSG:4326", "point": {"x": x.to_string(), "y": y.to_string()}}
        }
    })
    .to_string()
}

pub fn vworld_not_found() -> String {
    r#"{"response":{"status":"NOT_FOUND"}}"#.to_string()
}

pub fn nominatim(items: &[(f64, f64, &str)]) -> String {
    let arr: Vec<_> = items
        .iter()
        .map(|(lat, lon, name)| {
            serde_json::json!({"lat": lat.to_string(), "lon": lon.to_string(), "display_name": name})
        })
        .collect();
    serde_json::Value::Array(arr).to_string()
}

pub fn seoul_city_hall() -> Coordinates {
    Coordinates::new(37.5665, 126.9780)
}
