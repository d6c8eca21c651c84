//! Address geocoding for property listings.
//!
//! Turns a free-text Korean address into coordinates through an ordered
//! failover chain: V-World direct, V-World relays, Nominatim, and a static
//! landmark fallback. Includes a caller-side file cache.

pub mod cache;
pub mod config;
pub mod providers;
pub mod resolver;
pub mod types;

pub use cache::GeocodeCache;
pub use config::{AddressType, Landmark, ResolverConfig};
pub use providers::{Provider, StaticFallback};
pub use resolver::{resolve, AddressResolver, CancelFlag};
pub use types::{
    AddressQuery, BoundingBox, Coordinates, GeocodeError, ProviderHit, ProviderUnavailable,
    ResolutionMethod, ResolutionResult, StageFailure,
};
