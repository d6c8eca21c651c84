mod common;

use approx::assert_abs_diff_eq;
use common::*;
use listing_geocoder::geocode::{
    resolve, AddressResolver, CancelFlag, Coordinates, GeocodeError, ResolutionMethod,
    ResolverConfig,
};
use std::time::{Duration, Instant};

const TEHERAN: &str = "서울특별시 강남구 테헤란로 152";

#[test]
fn test_direct_success_skips_everything_else() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Json(vworld_ok(127.036514469, 37.500028534, "서울특별시 강남구 테헤란로 152 (역삼동)"))),
        (RELAY_A_PATH, Behavior::Json(vworld_ok(1.0, 1.0, "relay"))),
        (SEARCH_PATH, Behavior::Json(nominatim(&[(37.4, 127.0, "public")]))),
    ]);
    let cfg = ResolverConfig {
        proxy_endpoints: vec![mock.url(RELAY_A_PATH)],
        ..mock.config()
    };

    let r = AddressResolver::new(cfg).resolve(TEHERAN).unwrap();

    assert_eq!(r.method, ResolutionMethod::PrimaryDirect);
    assert!(r.succeeded);
    assert_abs_diff_eq!(r.latitude, 37.500028534, epsilon = 1e-9);
    assert_abs_diff_eq!(r.longitude, 127.036514469, epsilon = 1e-9);
    assert_eq!(r.raw_address_echo, "서울특별시 강남구 테헤란로 152 (역삼동)");

    assert_eq!(mock.calls(DIRECT_PATH), 1);
    assert_eq!(mock.calls(RELAY_A_PATH), 0);
    assert_eq!(mock.calls(SEARCH_PATH), 0);

    let sent = &mock.requests(DIRECT_PATH)[0];
    assert_eq!(sent.params["address"], TEHERAN);
    assert_eq!(sent.params["key"], TEST_KEY);
    assert_eq!(sent.params["request"], "getcoord");
    assert_eq!(sent.params["type"], "road");
    assert_eq!(sent.params["crs"], "epsg:4326");
}

#[test]
fn test_relay_used_after_direct_502_with_browser_headers() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Status(502)),
        (RELAY_A_PATH, Behavior::Json(vworld_ok(127.0276, 37.4979, "서울특별시 강남구"))),
        (SEARCH_PATH, Behavior::Json(nominatim(&[(37.4, 127.0, "public")]))),
    ]);
    let cfg = ResolverConfig {
        proxy_endpoints: vec![mock.url(RELAY_A_PATH)],
        ..mock.config()
    };

    let r = AddressResolver::new(cfg).resolve("서울특별시 강남구").unwrap();

    assert_eq!(r.method, ResolutionMethod::PrimaryProxy);
    assert!(r.succeeded);
    assert_eq!(r.failures.len(), 1);
    assert_eq!(r.failures[0].method, ResolutionMethod::PrimaryDirect);
    assert_eq!(r.failures[0].reason, "HTTP status 502");
    assert_eq!(mock.calls(SEARCH_PATH), 0);

    let relayed = &mock.requests(RELAY_A_PATH)[0];
    assert_eq!(relayed.params["key"], TEST_KEY);
    assert_eq!(relayed.params["address"], "서울특별시 강남구");
    assert_eq!(relayed.headers["referer"], "https://www.vworld.kr/");
    assert_eq!(relayed.headers["origin"], "https://www.vworld.kr");
    assert!(relayed.headers["user-agent"].starts_with("Mozilla/5.0"));
}

#[test]
fn test_relays_tried_in_order() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Json(vworld_not_found())),
        (RELAY_A_PATH, Behavior::Status(500)),
        (RELAY_B_PATH, Behavior::Json(vworld_ok(126.9015, 37.5637, "서울특별시 마포구"))),
    ]);
    let cfg = ResolverConfig {
        proxy_endpoints: vec![mock.url(RELAY_A_PATH), mock.url(RELAY_B_PATH)],
        ..mock.config()
    };

    let r = AddressResolver::new(cfg).resolve("마포구 월드컵북로 396").unwrap();

    assert_eq!(r.method, ResolutionMethod::PrimaryProxy);
    assert_eq!(r.coordinates(), Coordinates::new(37.5637, 126.9015));
    let stages: Vec<_> = r.failures.iter().map(|f| f.stage.as_str()).collect();
    assert_eq!(stages, vec!["vworld-direct", "vworld-proxy#1"]);
    assert_eq!(r.failures[0].reason, "provider rejected query: NOT_FOUND");
    assert_eq!(mock.calls(RELAY_B_PATH), 1);
}

#[test]
fn test_no_relay_configured_goes_straight_to_public() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Status(502)),
        (SEARCH_PATH, Behavior::Json(nominatim(&[(37.4979, 127.0276, "강남구, 서울특별시, 대한민국")]))),
    ]);

    let r = AddressResolver::new(mock.config()).resolve(TEHERAN).unwrap();

    assert_eq!(r.method, ResolutionMethod::SecondaryPublic);
    assert!(r.succeeded);
    assert_eq!(r.raw_address_echo, "강남구, 서울특별시, 대한민국");
    // Only the direct stage failed; the absent relay stage is not a failure.
    assert_eq!(r.failures.len(), 1);
    assert_eq!(r.failures[0].method, ResolutionMethod::PrimaryDirect);

    let sent = &mock.requests(SEARCH_PATH)[0];
    assert_eq!(sent.params["q"], TEHERAN);
    assert_eq!(sent.params["format"], "json");
    assert_eq!(sent.params["countrycodes"], "kr");
}

#[test]
fn test_all_providers_fail_yields_configured_fallback() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Status(502)),
        (RELAY_A_PATH, Behavior::Json(vworld_not_found())),
        (SEARCH_PATH, Behavior::Json(nominatim(&[]))),
    ]);
    let fallback = Coordinates::new(35.1796, 129.0756);
    let cfg = ResolverConfig {
        proxy_endpoints: vec![mock.url(RELAY_A_PATH)],
        fallback,
        ..mock.config()
    };

    let r = AddressResolver::new(cfg).resolve(TEHERAN).unwrap();

    assert_eq!(r.method, ResolutionMethod::StaticFallback);
    assert!(!r.succeeded);
    assert_eq!(r.coordinates(), fallback);
    assert!(r.fallback_keyword.is_none());
    assert_eq!(r.raw_address_echo, TEHERAN);
    assert_eq!(r.failures.len(), 3);
    assert_eq!(mock.total_calls(), 3);
}

#[test]
fn test_public_hits_outside_region_are_discarded() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Status(503)),
        (SEARCH_PATH, Behavior::Json(nominatim(&[(51.5074, -0.1278, "London")]))),
    ]);

    let r = AddressResolver::new(mock.config()).resolve("제주시 첨단로 242").unwrap();

    assert_eq!(r.method, ResolutionMethod::StaticFallback);
    assert_eq!(r.coordinates(), seoul_city_hall());
    assert_eq!(
        r.failures.last().map(|f| f.reason.as_str()),
        Some("no candidate inside the configured region")
    );
}

#[test]
fn test_slow_providers_time_out_and_chain_advances() {
    let slow = Duration::from_secs(3);
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Delayed(slow, vworld_ok(127.0, 37.5, "late"))),
        (SEARCH_PATH, Behavior::Delayed(slow, nominatim(&[(37.5, 127.0, "late")]))),
    ]);
    let cfg = ResolverConfig {
        stage_timeout_ms: 300,
        ..mock.config()
    };

    let started = Instant::now();
    let r = AddressResolver::new(cfg).resolve(TEHERAN).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(r.method, ResolutionMethod::StaticFallback);
    assert!(!r.succeeded);
    assert_eq!(r.failures.len(), 2);
    assert!(r.failures.iter().all(|f| f.reason.starts_with("timed out")));
    // Two 300 ms stages plus slack, far below the mock's delay.
    assert!(elapsed < Duration::from_millis(2_000), "took {:?}", elapsed);
}

#[test]
fn test_cancel_mid_call_returns_promptly() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Delayed(Duration::from_secs(5), vworld_ok(127.0, 37.5, "late"))),
        (SEARCH_PATH, Behavior::Json(nominatim(&[(37.5, 127.0, "public")]))),
    ]);
    let cfg = ResolverConfig {
        stage_timeout_ms: 3_000,
        ..mock.config()
    };
    let resolver = AddressResolver::new(cfg);
    let flag = CancelFlag::new();

    let canceller = flag.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        canceller.cancel();
    });

    let started = Instant::now();
    let r = resolver.resolve_with_cancel(TEHERAN, &flag).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(r.method, ResolutionMethod::StaticFallback);
    assert!(!r.succeeded);
    assert_eq!(mock.calls(SEARCH_PATH), 0);
    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
}

#[test]
fn test_zero_stage_timeout_uses_default() {
    let mock = MockProviders::start(vec![(
        DIRECT_PATH,
        Behavior::Json(vworld_ok(127.036514469, 37.500028534, TEHERAN)),
    )]);
    let cfg = ResolverConfig {
        stage_timeout_ms: 0,
        ..mock.config()
    };

    let r = AddressResolver::new(cfg).resolve(TEHERAN).unwrap();

    assert_eq!(r.method, ResolutionMethod::PrimaryDirect);
    assert!(r.failures.is_empty());
    assert_eq!(mock.calls(DIRECT_PATH), 1);
}

#[test]
fn test_unreachable_endpoint_is_a_network_failure() {
    let mock = MockProviders::start(vec![(
        SEARCH_PATH,
        Behavior::Json(nominatim(&[(37.5665, 126.978, "서울특별시청")])),
    )]);
    let cfg = ResolverConfig {
        // Port 9 (discard) on loopback: nothing listens there.
        primary_endpoint: "http://127.0.0.1:9/req/address".to_string(),
        ..mock.config()
    };

    let r = AddressResolver::new(cfg).resolve("서울특별시 중구 세종대로 110").unwrap();

    assert_eq!(r.method, ResolutionMethod::SecondaryPublic);
    assert!(r.failures[0].reason.starts_with("network error"));
}

#[test]
fn test_blank_address_makes_no_calls() {
    let mock = MockProviders::start(vec![
        (DIRECT_PATH, Behavior::Json(vworld_ok(127.0, 37.5, "x"))),
        (SEARCH_PATH, Behavior::Json(nominatim(&[(37.5, 127.0, "x")]))),
    ]);

    let err = resolve("   ", &mock.config()).unwrap_err();

    assert!(matches!(err, GeocodeError::InvalidInput(_)));
    assert_eq!(mock.total_calls(), 0);
}

#[test]
fn test_one_shot_resolve_matches_resolver() {
    let mock = MockProviders::start(vec![(
        DIRECT_PATH,
        Behavior::Json(vworld_ok(127.036514469, 37.500028534, TEHERAN)),
    )]);

    let r = resolve(TEHERAN, &mock.config()).unwrap();

    assert_eq!(r.method, ResolutionMethod::PrimaryDirect);
    assert_abs_diff_eq!(r.longitude, 127.036514469, epsilon = 1e-9);
}
