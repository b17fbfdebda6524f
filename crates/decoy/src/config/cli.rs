use crate::imposter::ManagerSettings;
use crate::logging::LogFormat;
use crate::scripting::ScriptLimits;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use super::ConfigError;

#[derive(Parser, Debug, Clone)]
#[command(name = "decoy", version, about = "Programmable imposters with JavaScript injection")]
pub struct Args {
    /// Admin API port
    #[arg(long, env = "DECOY_PORT", default_value_t = 2525)]
    pub port: u16,

    /// Bind address for the admin API and for imposters without their own host
    #[arg(long, env = "DECOY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// JSON or YAML file with `{imposters: [...]}` to create at startup
    #[arg(long, env = "DECOY_CONFIGFILE")]
    pub configfile: Option<PathBuf>,

    /// Reject any imposter or stub that uses `inject`
    #[arg(long, env = "DECOY_DISABLE_INJECTION")]
    pub disable_injection: bool,

    /// Upper bound on a single injected function, callback included
    #[arg(long, env = "DECOY_INJECT_TIMEOUT_MS")]
    pub inject_timeout_ms: Option<u64>,

    /// Maximum loop iterations per injected function
    #[arg(long, env = "DECOY_SCRIPT_LOOP_LIMIT", default_value_t = 100_000_000)]
    pub script_loop_limit: u64,

    /// PEM certificate for https imposters that do not carry one
    #[arg(long, env = "DECOY_DEFAULT_CERT", requires = "default_key")]
    pub default_cert: Option<PathBuf>,

    /// PEM private key for https imposters that do not carry one
    #[arg(long, env = "DECOY_DEFAULT_KEY", requires = "default_cert")]
    pub default_key: Option<PathBuf>,

    /// Log level or filter directive; `DECOY_LOG` overrides it
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Human)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn manager_settings(&self) -> Result<ManagerSettings, ConfigError> {
        if self.inject_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "--inject-timeout-ms must be greater than zero".to_string(),
            ));
        }
        if self.script_loop_limit == 0 {
            return Err(ConfigError::Invalid(
                "--script-loop-limit must be greater than zero".to_string(),
            ));
        }

        Ok(ManagerSettings {
            allow_injection: !self.disable_injection,
            host: self.host.clone(),
            default_cert: self.default_cert.clone(),
            default_key: self.default_key.clone(),
            limits: ScriptLimits {
                loop_iterations: self.script_loop_limit,
                timeout: self.inject_timeout_ms.map(Duration::from_millis),
                ..ScriptLimits::default()
            },
        })
    }
}
