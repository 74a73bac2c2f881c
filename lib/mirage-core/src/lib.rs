//! Synthetic, correlated telemetry for imaginary distributed systems.
//!
//! A scenario describes a set of services, the datastores and queues they use, and how they call each other. Jobs walk
//! that topology to generate traces, correlated logs and periodic metric snapshots, and stream them as OTLP/JSON to a
//! collector. Chaos scenarios can be layered over a running job for a bounded time to change its behavior.
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod model;
pub mod otlp;
pub mod registry;
pub mod sender;
