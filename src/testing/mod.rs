//! Testing utilities and mock implementations
//!
//! In-memory stand-ins for the broker, the inbound queue and the image
//! predictor, so the worker can be exercised without external services.

pub mod mocks;

pub use mocks::*;
