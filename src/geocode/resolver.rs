//! Address resolver: runs the failover chain.
//!
//! Chain:  V-World direct → V-World relays (in order) → Nominatim → static fallback
//!
//! Stages run one after another; the first live stage that produces a
//! coordinate wins. Every failure is absorbed and recorded. The static stage
//! always answers, so a valid query always gets a result.

use super::config::{redact, ResolverConfig};
use super::providers::{Nominatim, Provider, StaticFallback, VWorldDirect, VWorldProxy};
use super::types::{
    AddressQuery, GeocodeError, ProviderHit, ProviderUnavailable, ResolutionMethod,
    ResolutionResult, StageFailure,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Shared flag a caller flips when it no longer wants the answer.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How often a running stage checks the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// The resolver with its ordered stages.
pub struct AddressResolver {
    chain: Vec<Arc<dyn Provider>>,
    terminal: StaticFallback,
}

impl AddressResolver {
    /// Build the standard chain from configuration. Stages whose prerequisites
    /// are missing (no API key, no relays, public geocoder disabled) are left
    /// out entirely rather than failing at call time.
    pub fn new(config: ResolverConfig) -> Self {
        if config.stage_timeout_ms == 0 {
            warn!(
                default_ms = config.stage_timeout().as_millis() as u64,
                "stage timeout of 0 ms ignored; using default"
            );
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(config.stage_timeout())
            .user_agent(&config.user_agent)
            .build();

        let mut chain: Vec<Arc<dyn Provider>> = Vec::new();

        match config.primary_api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => {
                debug!(key = %redact(key), "V-World key configured");
                chain.push(Arc::new(VWorldDirect::new(agent.clone(), &config, key.to_string())));
                for (i, url) in config.proxy_endpoints.iter().enumerate() {
                    chain.push(Arc::new(VWorldProxy::new(
                        agent.clone(),
                        &config,
                        key.to_string(),
                        url.clone(),
                        i + 1,
                    )));
                }
            }
            None => {
                if !config.proxy_endpoints.is_empty() {
                    warn!("relay endpoints configured without a V-World key; relays disabled");
                }
            }
        }

        if config.secondary_enabled {
            chain.push(Arc::new(Nominatim::new(agent, &config)));
        }

        Self {
            chain,
            terminal: StaticFallback::new(&config),
        }
    }

    /// Assemble a resolver from explicit stages (used by tests and embedders
    /// that bring their own providers).
    pub fn from_parts(chain: Vec<Box<dyn Provider>>, terminal: StaticFallback) -> Self {
        Self {
            chain: chain.into_iter().map(Arc::from).collect(),
            terminal,
        }
    }

    /// Labels of the live stages, in the order they will be tried.
    pub fn stage_labels(&self) -> Vec<String> {
        self.chain.iter().map(|p| p.label()).collect()
    }

    /// Resolve an address. Only blank input is an error.
    pub fn resolve(&self, address: &str) -> Result<ResolutionResult, GeocodeError> {
        self.resolve_with_cancel(address, &CancelFlag::new())
    }

    /// Resolve, watching `cancel` before and during each live stage. Once
    /// cancelled the running call is abandoned, the remaining live stages are
    /// skipped and the static answer is returned.
    pub fn resolve_with_cancel(
        &self,
        address: &str,
        cancel: &CancelFlag,
    ) -> Result<ResolutionResult, GeocodeError> {
        let query = AddressQuery::new(address)?;

        let span = info_span!("resolve", address = %query);
        let _enter = span.enter();
        let started = Instant::now();

        let mut failures = Vec::new();

        for stage in &self.chain {
            if cancel.is_cancelled() {
                warn!(stage = %stage.label(), "resolution cancelled; skipping remaining live stages");
                break;
            }

            let stage_started = Instant::now();
            let outcome = match attempt_cancellable(stage, &query, cancel) {
                Some(outcome) => outcome,
                None => {
                    warn!(
                        stage = %stage.label(),
                        elapsed_ms = stage_started.elapsed().as_millis() as u64,
                        "resolution cancelled mid-stage; abandoning call"
                    );
                    break;
                }
            };
            match outcome {
                Ok(hit) => {
                    info!(
                        stage = %stage.label(),
                        method = %stage.method(),
                        lat = hit.coords.lat,
                        lon = hit.coords.lon,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "address resolved"
                    );
                    if hit.coords.is_null_island() {
                        warn!(stage = %stage.label(), "provider returned 0.0/0.0");
                    }
                    return Ok(ResolutionResult {
                        latitude: hit.coords.lat,
                        longitude: hit.coords.lon,
                        method: stage.method(),
                        raw_address_echo: hit.echo.unwrap_or_else(|| query.to_string()),
                        succeeded: true,
                        fallback_keyword: None,
                        failures,
                    });
                }
                Err(e) => {
                    warn!(
                        stage = %stage.label(),
                        error = %e,
                        elapsed_ms = stage_started.elapsed().as_millis() as u64,
                        "stage failed; moving on"
                    );
                    failures.push(StageFailure {
                        method: stage.method(),
                        stage: stage.label(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let (coords, keyword) = self.terminal.locate(&query);
        warn!(
            keyword = keyword.as_deref().unwrap_or("-"),
            failed_stages = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "no live provider answered; using static fallback"
        );

        Ok(ResolutionResult {
            latitude: coords.lat,
            longitude: coords.lon,
            method: ResolutionMethod::StaticFallback,
            raw_address_echo: query.to_string(),
            succeeded: false,
            fallback_keyword: keyword,
            failures,
        })
    }
}

/// Run one attempt on a helper thread and wait for it, polling `cancel`.
/// Returns `None` if cancelled first; the helper finishes on its own and its
/// answer is dropped.
fn attempt_cancellable(
    stage: &Arc<dyn Provider>,
    query: &AddressQuery,
    cancel: &CancelFlag,
) -> Option<Result<ProviderHit, ProviderUnavailable>> {
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(stage);
    let owned = query.clone();
    let span = tracing::Span::current();
    let spawned = thread::Builder::new()
        .name(format!("geocode-{}", stage.label()))
        .spawn(move || {
            let _enter = span.enter();
            let _ = tx.send(worker.attempt(&owned));
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot spawn stage thread; calling inline");
        return Some(stage.attempt(query));
    }

    loop {
        match rx.recv_timeout(CANCEL_POLL) {
            Ok(outcome) => return Some(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return None;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Some(Err(ProviderUnavailable::Network("stage worker panicked".into())));
            }
        }
    }
}

/// One-shot convenience: build a resolver for `config` and resolve `address`.
pub fn resolve(address: &str, config: &ResolverConfig) -> Result<ResolutionResult, GeocodeError> {
    AddressResolver::new(config.clone()).resolve(address)
}
