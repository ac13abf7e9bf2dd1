//! Session bookkeeping for the streamable transport.

mod registry;

pub use registry::{RegistryConfig, SessionRegistry};
