use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Atelier real-time collaboration server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(
    name = "atelier-server",
    version,
    about = "Atelier real-time collaboration server"
)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "ATELIER_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "ATELIER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./atelier.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "ATELIER_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Execution engine connection settings (loaded from [engine] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub engine: Option<EngineConfig>,
}

/// Where the execution engine listens and the limits each request carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine host (default: 127.0.0.1)
    #[serde(default = "default_engine_host")]
    pub host: String,

    /// Engine port (default: 8884)
    #[serde(default = "default_engine_port")]
    pub port: u16,

    /// Socket connect timeout in seconds (default: 5)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-execution time limit in seconds, passed to the engine (default: 30)
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: u64,

    /// Per-execution memory limit in MB, passed to the engine (default: 256)
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: default_engine_host(),
            port: default_engine_port(),
            connect_timeout_secs: default_connect_timeout(),
            time_limit_secs: default_time_limit(),
            memory_limit_mb: default_memory_limit(),
        }
    }
}

fn default_engine_host() -> String {
    "127.0.0.1".to_string()
}

fn default_engine_port() -> u16 {
    8884
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_time_limit() -> u64 {
    30
}

fn default_memory_limit() -> u64 {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./atelier.toml".to_string(),
            json_logs: false,
            generate_config: false,
            engine: Some(EngineConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (ATELIER_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ATELIER_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Atelier Collaboration Server Configuration
# Place this file at ./atelier.toml or specify with --config <path>
# All settings can be overridden via environment variables (ATELIER_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Execution Engine ----
# [engine]

# Engine socket endpoint (default: 127.0.0.1:8884)
# host = "127.0.0.1"
# port = 8884

# Socket connect timeout in seconds (default: 5)
# connect_timeout_secs = 5

# Limits passed to the engine with each execution request
# time_limit_secs = 30
# memory_limit_mb = 256
"#
    .to_string()
}
