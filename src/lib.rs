//! hls-relay - Caching relay for live HLS streams
//!
//! This library crate exposes the relay pipeline for integration testing.

pub mod config;
pub mod manifest;
pub mod server;
pub mod streaming;
pub mod upstream;
