//! Service registry collaborator and the watch-driven resolver built on it.
//!
//! Discovery itself lives in an external, strongly consistent store; this
//! module fixes the interface and the key layout (`prefix/name/addr`).

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod resolver;

pub use resolver::{Address, Resolver, ResolverOptions, ResolverSink, SCHEME};

/// One registered instance of a named service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub name: String,
    pub addr: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Key this instance is stored under.
    pub fn instance_key(&self, prefix: &str) -> String {
        format!("{}/{}", service_key(prefix, &self.name), self.addr)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Registry(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Registry(e.to_string()))
    }
}

/// Key prefix shared by every instance of `name`.
pub fn service_key(prefix: &str, name: &str) -> String {
    format!("{prefix}/{name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A change under a watched service key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub kind: EventKind,
    pub key: String,
}

/// Client of the external registry.
///
/// Registrations are tied to a liveness lease held by the implementation, so
/// they disappear if the process dies without calling `unregister`.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    async fn register(&self, instance: &ServiceInstance) -> Result<()>;

    async fn unregister(&self, instance: &ServiceInstance) -> Result<()>;

    /// Point-in-time list of the instances of `name`.
    async fn list_services(&self, name: &str) -> Result<Vec<ServiceInstance>>;

    /// Stream of changes to the instances of `name`. Ends when the registry
    /// is closed.
    async fn subscribe(&self, name: &str) -> Result<BoxStream<'static, RegistryEvent>>;

    /// Cancel every subscription and release the lease.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let si = ServiceInstance::new("user-service", "10.0.0.1:8080");
        assert_eq!(service_key("/micro", "user-service"), "/micro/user-service");
        assert_eq!(si.instance_key("/micro"), "/micro/user-service/10.0.0.1:8080");
    }

    #[test]
    fn test_instance_json() {
        let si = ServiceInstance::new("user-service", "10.0.0.1:8080").with_tag("weight=3");
        let decoded = ServiceInstance::from_json(&si.to_json().unwrap()).unwrap();
        assert_eq!(decoded, si);

        let untagged =
            ServiceInstance::from_json(br#"{"name":"a","addr":"b"}"#).unwrap();
        assert!(untagged.tags.is_empty());

        assert!(matches!(
            ServiceInstance::from_json(b"not json"),
            Err(Error::Registry(_))
        ));
    }
}
