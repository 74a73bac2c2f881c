//! OTLP/JSON payload encoding.

mod encoder;
pub use self::encoder::{to_payload, OtlpEncoder};

pub mod wire;
