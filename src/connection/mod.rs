//! Backend connection provisioning.
//!
//! Providers turn a session or request into [`ConnectionParams`]; factories
//! turn parameters into live [`BackendConnection`]s.

pub mod backend;
pub mod headers;
pub mod params;
pub mod provider;
pub mod refresh;

pub use backend::{
    BackendConnection, BackendError, BackendRequest, BackendResponse, ConnectionFactory,
    HttpBackendConnection, HttpConnectionFactory, CSRF_FETCH_PATH, CSRF_HEADER,
};
pub use headers::{
    destination_from_headers, has_connection_headers, header_value, HeaderValidator, SapHeaderValidator,
};
pub use params::{AuthDescriptor, ConnectionParams, ConnectionParamsUpdate};
pub use provider::{
    validate_bind_scope, ConnectionProvider, ConnectionRequest, LocalConnectionProvider,
    ProviderMode, RemoteConnectionProvider, SharedConnectionProvider,
};
pub use refresh::RefreshingConnection;
