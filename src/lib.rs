//! dohrace - A DNS-over-HTTPS proxy that races upstream resolvers.
//!
//! This library exposes the resolver pipeline and transport for the binary,
//! benchmarks and integration tests.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod proxy;
pub mod race;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod upstream;

#[cfg(test)]
mod test_utils;
