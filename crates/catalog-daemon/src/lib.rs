//! HTTP daemon for the catalog backend.

pub mod responses;
pub mod server;
pub mod telemetry;
