//! # Command Line Interface
//!
//! Flags override values from the configuration file and environment.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{load_config, AuthMode, ConfigOverrides, GatewayConfig, TransportKind};
use crate::errors::Result;

#[derive(Parser, Debug)]
#[command(name = "adt-mcp-gateway")]
#[command(about = "MCP gateway exposing ABAP Development Tools")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Transport to serve
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Bind host for HTTP transports
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port for HTTP transports
    #[arg(long)]
    pub port: Option<u16>,

    /// Default destination when a request names none
    #[arg(long)]
    pub destination: Option<String>,

    /// Connection provider mode
    #[arg(long, value_enum)]
    pub auth_mode: Option<AuthMode>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            transport: self.transport,
            host: self.host.clone(),
            port: self.port,
            destination: self.destination.clone(),
            auth_mode: self.auth_mode,
        }
    }

    /// Load file and environment configuration, apply flags, then validate.
    pub fn resolve_config(&self) -> Result<GatewayConfig> {
        let mut config = load_config(self.config.as_deref())?;
        self.overrides().apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_flags() {
        let cli = Cli::try_parse_from([
            "adt-mcp-gateway",
            "--transport",
            "streamable-http",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--destination",
            "DEV",
            "--auth-mode",
            "remote",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.transport, Some(TransportKind::StreamableHttp));
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.auth_mode, Some(AuthMode::Remote));
        assert!(cli.verbose);

        let overrides = cli.overrides();
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.destination.as_deref(), Some("DEV"));
    }

    #[test]
    fn test_defaults_leave_config_alone() {
        let cli = Cli::try_parse_from(["adt-mcp-gateway"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.transport.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_rejects_unknown_transport() {
        assert!(Cli::try_parse_from(["adt-mcp-gateway", "--transport", "websocket"]).is_err());
    }

    #[test]
    fn test_resolve_config_validates_overrides() {
        let cli = Cli::try_parse_from([
            "adt-mcp-gateway",
            "--transport",
            "sse",
            "--port",
            "0",
        ])
        .unwrap();
        assert!(cli.resolve_config().is_err());
    }
}
