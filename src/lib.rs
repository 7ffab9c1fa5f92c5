//! Floodgate - Adaptive Traffic Admission Engine
//!
//! This crate implements a rule-driven admission decision engine: for each
//! unit of traffic addressed to a named resource it decides whether to allow,
//! delay, or reject it, based on live statistics (request rate, error rate,
//! latency, concurrency, host load). Five protection strategies (rate
//! limiting, hotspot limiting, circuit breaking, concurrency isolation, and
//! system-level adaptive overload protection) are compiled from a
//! declarative rule set and evaluated continuously. Decisions cross to the
//! data path through a compare-and-swap decision bridge rather than shared
//! mutable memory.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod rules;
pub mod stats;
