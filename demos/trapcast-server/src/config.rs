//! Server configuration from flags, environment and `.env`.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{ArgAction, Parser, builder::BoolishValueParser};
use trapcast_supervisor::WorkerSettings;
use trapcast_transport::{BridgeConfig, RegistryConfig, bridge::DEFAULT_BRIDGE_PORT};

/// Username for tokens given without one.
const DEFAULT_USER: &str = "admin";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Real-time status and trap push server", long_about = None)]
pub struct ServerConfig {
    /// HTTP listen address.
    #[arg(long, env = "TRAPCAST_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Loopback UDP port of the event bridge.
    #[arg(long, env = "WS_INTERNAL_PORT", default_value_t = DEFAULT_BRIDGE_PORT)]
    pub ws_internal_port: u16,

    /// SNMP simulator port.
    #[arg(long, env = "SNMP_PORT", default_value_t = 1061)]
    pub snmp_port: u16,

    /// SNMP community string.
    #[arg(long, env = "SNMP_COMMUNITY", default_value = "public")]
    pub community: String,

    /// Trap receiver port.
    #[arg(long, env = "TRAP_PORT", default_value_t = 1162)]
    pub trap_port: u16,

    #[arg(long, env = "SIMULATOR_COMMAND", default_value = "python workers/snmp_simulator.py")]
    pub simulator_command: String,

    #[arg(
        long,
        env = "TRAP_RECEIVER_COMMAND",
        default_value = "python workers/trap_receiver.py"
    )]
    pub trap_receiver_command: String,

    #[arg(
        long,
        env = "AUTO_START_SIMULATOR",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub auto_start_simulator: bool,

    #[arg(
        long,
        env = "AUTO_START_TRAP_RECEIVER",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub auto_start_trap_receiver: bool,

    /// Session lifetime in seconds.
    #[arg(long, env = "SESSION_TIMEOUT", default_value_t = 3600)]
    pub session_timeout: u64,

    /// Counter persistence file. Counters stay in memory when unset.
    #[arg(long, env = "STATS_FILE")]
    pub stats_file: Option<PathBuf>,

    /// Pre-seeded session tokens, `token` or `token:user`, comma separated.
    #[arg(long, env = "TRAPCAST_TOKENS", value_delimiter = ',')]
    pub tokens: Vec<String>,

    /// Per-connection send queue depth.
    #[arg(long, env = "WS_SEND_QUEUE_DEPTH", default_value_t = 64)]
    pub send_queue_depth: usize,

    /// Per-write timeout in milliseconds.
    #[arg(long, env = "WS_SEND_TIMEOUT_MS", default_value_t = 10_000)]
    pub send_timeout_ms: u64,

    /// CORS origins, comma separated. `*` allows any origin.
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:8080"
    )]
    pub allowed_origins: Vec<String>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            simulator_command: self.simulator_command.clone(),
            trap_receiver_command: self.trap_receiver_command.clone(),
            simulator_port: self.snmp_port,
            community: self.community.clone(),
            trap_port: self.trap_port,
            ..WorkerSettings::default()
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            queue_depth: self.send_queue_depth,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            ..RegistryConfig::default()
        }
    }

    pub const fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::with_port(self.ws_internal_port)
    }

    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    /// `(token, user)` pairs from `--tokens`, skipping blanks.
    pub fn seeded_sessions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens
            .iter()
            .map(String::as_str)
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.split_once(':').unwrap_or((entry, DEFAULT_USER)))
    }
}
