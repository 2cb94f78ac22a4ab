//! Signing keys held by the server

mod registry;

pub use registry::{KeyRegistry, DEFAULT_NETWORK};
