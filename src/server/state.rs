use crate::geocode::{AddressResolver, GeocodeCache};
use std::sync::{Arc, Mutex};

pub struct AppState {
    pub resolver: Arc<AddressResolver>,
    /// `None` disables caching (e.g. `--no-cache`).
    pub cache: Option<Mutex<GeocodeCache>>,
}

impl AppState {
    pub fn new(resolver: AddressResolver, cache: Option<GeocodeCache>) -> Self {
        Self {
            resolver: Arc::new(resolver),
            cache: cache.map(Mutex::new),
        }
    }
}
