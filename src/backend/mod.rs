//! Chat backends: the prioritized model registry and the proxy client.

pub mod proxy;
pub mod registry;

pub use proxy::{ChatBackend, ProxyClient, ProxyError, ProxyOutcome};
pub use registry::{ChatModel, ModelRegistry, RegistryError};
