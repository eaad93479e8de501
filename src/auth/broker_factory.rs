//! Broker cache keyed by `sessionId:destination`.
//!
//! Every key maps to a once-cell, so concurrent first requests for the same key
//! await a single construction and receive the same instance.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::auth::broker::{AuthBroker, BrokerDependencies};
use crate::auth::error::AuthError;

type BrokerCell = Arc<OnceCell<Arc<AuthBroker>>>;

pub struct AuthBrokerFactory {
    brokers: DashMap<String, BrokerCell>,
    deps: BrokerDependencies,
}

fn broker_key(session_id: &str, destination: &str) -> String {
    format!("{}:{}", session_id, destination)
}

fn session_prefix(session_id: &str) -> String {
    format!("{}:", session_id)
}

impl AuthBrokerFactory {
    pub fn new(deps: BrokerDependencies) -> Self {
        Self { brokers: DashMap::new(), deps }
    }

    /// Return the cached broker for the pair, constructing it on first use.
    pub async fn get_or_create_broker(
        &self,
        session_id: &str,
        destination: &str,
    ) -> Result<Arc<AuthBroker>, AuthError> {
        let key = broker_key(session_id, destination);
        let cell = self.brokers.entry(key.clone()).or_default().clone();

        let result = cell
            .get_or_try_init(|| async {
                AuthBroker::connect(session_id, destination, &self.deps).await.map(Arc::new)
            })
            .await
            .cloned();

        if result.is_err() {
            // Leave no empty slot behind; a later caller may succeed
            self.brokers.remove_if(&key, |_, c| Arc::ptr_eq(c, &cell) && !c.initialized());
        }

        result
    }

    /// Exact lookup when `destination` is given, otherwise the first broker of the session.
    pub fn get_broker(&self, session_id: &str, destination: Option<&str>) -> Option<Arc<AuthBroker>> {
        match destination {
            Some(destination) => self
                .brokers
                .get(&broker_key(session_id, destination))
                .and_then(|cell| cell.get().cloned()),
            None => {
                let prefix = session_prefix(session_id);
                self.brokers
                    .iter()
                    .filter(|entry| entry.key().starts_with(&prefix))
                    .find_map(|entry| entry.value().get().cloned())
            }
        }
    }

    /// Remove one broker, or every broker of the session when `destination` is omitted.
    pub fn delete_broker(&self, session_id: &str, destination: Option<&str>) -> usize {
        let removed = match destination {
            Some(destination) => {
                usize::from(self.brokers.remove(&broker_key(session_id, destination)).is_some())
            }
            None => {
                let prefix = session_prefix(session_id);
                let before = self.brokers.len();
                self.brokers.retain(|key, _| !key.starts_with(&prefix));
                before.saturating_sub(self.brokers.len())
            }
        };

        if removed > 0 {
            debug!(session_id = %session_id, destination = ?destination, removed, "Deleted brokers");
        }
        removed
    }

    /// Drop every cached broker
    pub fn clear_all(&self) {
        let count = self.brokers.len();
        self.brokers.clear();
        info!(count, "Cleared broker cache");
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }
}

pub type SharedBrokerFactory = Arc<AuthBrokerFactory>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service_key::{InMemoryServiceKeyStore, ServiceKey};
    use crate::auth::token_store::InMemoryTokenStore;

    fn factory() -> AuthBrokerFactory {
        let keys = InMemoryServiceKeyStore::new();
        for destination in ["destA", "destB"] {
            keys.insert(
                destination,
                ServiceKey { url: format!("https://{}.example.com", destination), client: None, uaa: None },
            );
        }
        AuthBrokerFactory::new(BrokerDependencies {
            service_keys: Arc::new(keys),
            tokens: Arc::new(InMemoryTokenStore::new()),
            provider: None,
            refresh_skew: chrono::Duration::seconds(60),
        })
    }

    #[tokio::test]
    async fn test_same_key_returns_same_instance() {
        let factory = factory();
        let first = factory.get_or_create_broker("s1", "destA").await.unwrap();
        let second = factory.get_or_create_broker("s1", "destA").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.broker_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_brokers() {
        let factory = factory();
        let a = factory.get_or_create_broker("s1", "destA").await.unwrap();
        let b = factory.get_or_create_broker("s1", "destB").await.unwrap();
        let other = factory.get_or_create_broker("s2", "destA").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(b.destination(), "destB");
    }

    #[tokio::test]
    async fn test_get_broker_by_prefix() {
        let factory = factory();
        assert!(factory.get_broker("s1", None).is_none());
        let created = factory.get_or_create_broker("s1", "destA").await.unwrap();
        let found = factory.get_broker("s1", None).unwrap();
        assert!(Arc::ptr_eq(&created, &found));
        // "s1" must not match brokers of "s10"
        assert!(factory.get_broker("s", None).is_none());
    }

    #[tokio::test]
    async fn test_delete_all_session_brokers() {
        let factory = factory();
        factory.get_or_create_broker("s1", "destA").await.unwrap();
        factory.get_or_create_broker("s1", "destB").await.unwrap();
        factory.get_or_create_broker("s2", "destA").await.unwrap();

        assert_eq!(factory.delete_broker("s1", None), 2);
        assert!(factory.get_broker("s1", Some("destA")).is_none());
        assert!(factory.get_broker("s2", Some("destA")).is_some());
    }

    #[tokio::test]
    async fn test_failed_construction_leaves_no_entry() {
        let factory = factory();
        let error = factory.get_or_create_broker("s1", "missing").await.unwrap_err();
        assert!(matches!(error, AuthError::ServiceKeyNotFound(_)));
        assert_eq!(factory.broker_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let factory = factory();
        factory.get_or_create_broker("s1", "destA").await.unwrap();
        factory.clear_all();
        assert_eq!(factory.broker_count(), 0);
    }
}
