//! # Configuration Management
//!
//! Layers an optional YAML/TOML/JSON file under `MCP_GATEWAY__*` environment
//! variables, then applies command line overrides.

pub mod settings;

use std::path::Path;

pub use settings::{
    AuthConfig, AuthMode, BackendConfig, GatewayConfig, ObservabilityConfig, ToolsConfig,
    TransportConfig, TransportKind,
};

use crate::errors::Result;

/// Environment variable prefix, e.g. `MCP_GATEWAY__TRANSPORT__PORT=8080`
pub const ENV_PREFIX: &str = "MCP_GATEWAY";

/// Load configuration from an optional file and the environment.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("tools.groups")
            .try_parsing(true),
    );

    let config: GatewayConfig = builder.build()?.try_deserialize()?;
    Ok(config)
}

/// Command line values that take precedence over file and environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub transport: Option<TransportKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub destination: Option<String>,
    pub auth_mode: Option<AuthMode>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut GatewayConfig) {
        if let Some(kind) = self.transport {
            config.transport.kind = kind;
        }
        if let Some(host) = self.host {
            config.transport.host = host;
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if let Some(destination) = self.destination {
            config.auth.destination = Some(destination);
        }
        if let Some(mode) = self.auth_mode {
            config.auth.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "transport:\n  kind: sse\n  host: 0.0.0.0\n  port: 8088\nauth:\n  destination: DEV\n"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.transport.kind, TransportKind::Sse);
        assert_eq!(config.transport.host, "0.0.0.0");
        assert_eq!(config.transport.port, 8088);
        assert_eq!(config.transport.sse_path, "/sse");
        assert_eq!(config.auth.destination.as_deref(), Some("DEV"));
    }

    #[test]
    fn test_load_config_missing_file_fails() {
        let result = load_config(Some(Path::new("/nonexistent/gateway.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = GatewayConfig::default();
        ConfigOverrides {
            transport: Some(TransportKind::StreamableHttp),
            host: Some("0.0.0.0".to_string()),
            port: Some(9000),
            destination: Some("QAS".to_string()),
            auth_mode: Some(AuthMode::Remote),
        }
        .apply(&mut config);

        assert_eq!(config.transport.kind, TransportKind::StreamableHttp);
        assert_eq!(config.transport.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.auth.destination.as_deref(), Some("QAS"));
        assert_eq!(config.auth.mode, AuthMode::Remote);
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let mut config = GatewayConfig::default();
        ConfigOverrides::default().apply(&mut config);
        assert_eq!(config.transport.port, 3000);
        assert!(config.auth.destination.is_none());
    }
}
