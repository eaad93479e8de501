//! Destination authentication: service keys, token sets and per-session brokers.

pub mod broker;
pub mod broker_factory;
pub mod error;
pub mod secret;
pub mod service_key;
pub mod token_provider;
pub mod token_store;

pub use broker::{AuthBroker, BrokerDependencies};
pub use broker_factory::{AuthBrokerFactory, SharedBrokerFactory};
pub use error::AuthError;
pub use secret::SecretString;
pub use service_key::{
    FileServiceKeyStore, InMemoryServiceKeyStore, ServiceKey, ServiceKeyStore, UaaCredentials,
};
pub use token_provider::{OAuthTokenProvider, TokenProvider};
pub use token_store::{FileTokenStore, InMemoryTokenStore, SessionTokenStore, TokenSet};
