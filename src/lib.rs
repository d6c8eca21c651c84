//! Listing geocoder: best-effort coordinates for property listing addresses.

pub mod geocode;
pub mod server;
