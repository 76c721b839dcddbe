use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Registry, ServiceInstance};
use crate::error::{Error, Result};
use crate::picker::ReadyConn;

/// URI scheme resolved by [`Resolver`], as in `registry:///user-service`.
pub const SCHEME: &str = "registry";

/// A resolved backend address.
///
/// Instance tags of the form `key=value` become attributes, so a `weight=3`
/// tag feeds the weighted pickers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub addr: String,
    pub attributes: HashMap<String, String>,
}

impl Address {
    fn from_instance(instance: ServiceInstance) -> Self {
        let attributes = instance
            .tags
            .iter()
            .filter_map(|tag| tag.split_once('='))
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();

        Self {
            addr: instance.addr,
            attributes,
        }
    }

    /// Pair the address's attributes with an established connection.
    pub fn into_ready<T>(self, conn: T) -> ReadyConn<T> {
        ReadyConn {
            conn,
            attributes: self.attributes,
        }
    }
}

/// Receives resolution results; implemented by the RPC runtime's client side.
pub trait ResolverSink: Send + Sync + 'static {
    fn update_state(&self, addresses: Vec<Address>) -> Result<()>;

    fn report_error(&self, err: Error);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Bound on each `list_services` call.
    pub timeout: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
        }
    }
}

struct Shared<R, S> {
    registry: Arc<R>,
    target: String,
    sink: S,
    timeout: Duration,
}

impl<R: Registry, S: ResolverSink> Shared<R, S> {
    async fn resolve(&self) {
        let listed = tokio::time::timeout(self.timeout, self.registry.list_services(&self.target))
            .await
            .unwrap_or(Err(Error::Timeout(self.timeout)));

        let instances = match listed {
            Ok(instances) => instances,
            Err(e) => {
                tracing::warn!(service = %self.target, error = %e, "failed to list services");
                self.sink.report_error(e);
                return;
            }
        };

        let addresses: Vec<_> = instances.into_iter().map(Address::from_instance).collect();
        tracing::debug!(service = %self.target, count = addresses.len(), "resolved addresses");

        if let Err(e) = self.sink.update_state(addresses) {
            tracing::warn!(service = %self.target, error = %e, "failed to update resolver state");
            self.sink.report_error(e);
        }
    }

    async fn watch(self: Arc<Self>, cancel: CancellationToken) {
        let mut events = match self.registry.subscribe(&self.target).await {
            Ok(events) => events,
            Err(e) => {
                self.sink.report_error(e);
                return;
            }
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.next() => event,
            };

            match event {
                Some(event) => {
                    tracing::trace!(kind = ?event.kind, key = %event.key, "registry event");
                    self.resolve().await;
                }
                None => {
                    tracing::debug!(service = %self.target, "registry subscription ended");
                    break;
                }
            }
        }
    }
}

/// Keeps a [`ResolverSink`] up to date with the instances of one service.
///
/// Resolves once on [`start`](Self::start), then re-resolves on every
/// registry event until closed or dropped.
pub struct Resolver<R, S> {
    shared: Arc<Shared<R, S>>,
    cancel: CancellationToken,
}

impl<R: Registry, S: ResolverSink> Resolver<R, S> {
    pub async fn start(
        registry: Arc<R>,
        target: impl Into<String>,
        sink: S,
        options: ResolverOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            registry,
            target: target.into(),
            sink,
            timeout: options.timeout,
        });

        shared.resolve().await;

        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&shared).watch(cancel.clone()));

        Self { shared, cancel }
    }

    pub async fn resolve_now(&self) {
        self.shared.resolve().await
    }

    pub fn target(&self) -> &str {
        &self.shared.target
    }

    /// Stop watching. Further registry events are ignored.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<R, S> Drop for Resolver<R, S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures_util::stream::{self, BoxStream};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::registry::{EventKind, RegistryEvent};

    const PREFIX: &str = "/test";

    #[derive(Default)]
    struct MockRegistry {
        instances: Mutex<Vec<ServiceInstance>>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<RegistryEvent>>>,
        fail_list: AtomicBool,
    }

    impl MockRegistry {
        fn notify(&self, kind: EventKind, instance: &ServiceInstance) {
            let event = RegistryEvent {
                kind,
                key: instance.instance_key(PREFIX),
            };
            for tx in self.subscribers.lock().iter() {
                let _ = tx.send(event.clone());
            }
        }
    }

    #[async_trait]
    impl Registry for MockRegistry {
        async fn register(&self, instance: &ServiceInstance) -> Result<()> {
            self.instances.lock().push(instance.clone());
            self.notify(EventKind::Put, instance);
            Ok(())
        }

        async fn unregister(&self, instance: &ServiceInstance) -> Result<()> {
            self.instances.lock().retain(|si| si != instance);
            self.notify(EventKind::Delete, instance);
            Ok(())
        }

        async fn list_services(&self, name: &str) -> Result<Vec<ServiceInstance>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(Error::Registry("unavailable".into()));
            }

            Ok(self
                .instances
                .lock()
                .iter()
                .filter(|si| si.name == name)
                .cloned()
                .collect())
        }

        async fn subscribe(&self, _name: &str) -> Result<BoxStream<'static, RegistryEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().push(tx);

            Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed())
        }

        async fn close(&self) -> Result<()> {
            self.subscribers.lock().clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<Vec<Address>>>,
        errors: AtomicUsize,
    }

    impl RecordingSink {
        fn update_count(&self) -> usize {
            self.updates.lock().len()
        }

        fn last_addrs(&self) -> Vec<String> {
            let updates = self.updates.lock();
            let mut addrs: Vec<_> = updates
                .last()
                .map(|addresses| addresses.iter().map(|a| a.addr.clone()).collect())
                .unwrap_or_default();
            addrs.sort();
            addrs
        }
    }

    impl ResolverSink for Arc<RecordingSink> {
        fn update_state(&self, addresses: Vec<Address>) -> Result<()> {
            self.updates.lock().push(addresses);
            Ok(())
        }

        fn report_error(&self, _err: Error) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn subscribed(registry: &MockRegistry) {
        wait_for(|| !registry.subscribers.lock().is_empty()).await;
    }

    #[tokio::test]
    async fn test_initial_resolve_carries_tag_attributes() {
        let registry = Arc::new(MockRegistry::default());
        registry
            .register(&ServiceInstance::new("svc", "10.0.0.1:80").with_tag("weight=2"))
            .await
            .unwrap();
        registry
            .register(&ServiceInstance::new("other", "10.0.0.9:80"))
            .await
            .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let _resolver = Resolver::start(
            Arc::clone(&registry),
            "svc",
            Arc::clone(&sink),
            ResolverOptions::default(),
        )
        .await;

        assert_eq!(sink.update_count(), 1);
        let address = sink.updates.lock()[0][0].clone();
        assert_eq!(address.addr, "10.0.0.1:80");
        assert_eq!(address.into_ready(()).weight(), Some(2));
    }

    #[tokio::test]
    async fn test_watch_re_resolves_on_events() {
        let registry = Arc::new(MockRegistry::default());
        let a = ServiceInstance::new("svc", "10.0.0.1:80");
        let b = ServiceInstance::new("svc", "10.0.0.2:80");
        registry.register(&a).await.unwrap();

        let sink = Arc::new(RecordingSink::default());
        let resolver = Resolver::start(
            Arc::clone(&registry),
            "svc",
            Arc::clone(&sink),
            ResolverOptions::default(),
        )
        .await;
        assert_eq!(resolver.target(), "svc");
        subscribed(&registry).await;

        registry.register(&b).await.unwrap();
        wait_for(|| sink.update_count() == 2).await;
        assert_eq!(sink.last_addrs(), vec!["10.0.0.1:80", "10.0.0.2:80"]);

        registry.unregister(&a).await.unwrap();
        wait_for(|| sink.update_count() == 3).await;
        assert_eq!(sink.last_addrs(), vec!["10.0.0.2:80"]);
    }

    #[tokio::test]
    async fn test_closed_resolver_ignores_events() {
        let registry = Arc::new(MockRegistry::default());
        let sink = Arc::new(RecordingSink::default());
        let resolver = Resolver::start(
            Arc::clone(&registry),
            "svc",
            Arc::clone(&sink),
            ResolverOptions::default(),
        )
        .await;
        subscribed(&registry).await;

        resolver.close();
        assert!(resolver.is_closed());

        registry
            .register(&ServiceInstance::new("svc", "10.0.0.1:80"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sink.update_count(), 1);

        // an explicit resolve still works
        resolver.resolve_now().await;
        assert_eq!(sink.last_addrs(), vec!["10.0.0.1:80"]);
    }

    #[tokio::test]
    async fn test_list_failure_is_reported() {
        let registry = Arc::new(MockRegistry::default());
        registry.fail_list.store(true, Ordering::SeqCst);

        let sink = Arc::new(RecordingSink::default());
        let _resolver = Resolver::start(
            Arc::clone(&registry),
            "svc",
            Arc::clone(&sink),
            ResolverOptions::default(),
        )
        .await;

        assert_eq!(sink.update_count(), 0);
        assert_eq!(sink.errors.load(Ordering::SeqCst), 1);
    }
}
