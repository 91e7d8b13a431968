use std::{env, str::FromStr, time::Duration};

use tracing::info;

use crate::error::AppError;

const DEFAULT_DATABASE_URL: &str = "sqlite://courseforge.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_SANDBOX_PROGRAM: &str = "node";
const DEFAULT_SANDBOX_TIMEOUT_MS: u64 = 5000;
const DEFAULT_SANDBOX_MAX_PARALLEL: usize = 4;

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Interpreter the harness script is piped into.
    pub program: String,
    pub timeout: Duration,
    pub max_parallel: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_SANDBOX_PROGRAM.to_string(),
            timeout: Duration::from_millis(DEFAULT_SANDBOX_TIMEOUT_MS),
            max_parallel: DEFAULT_SANDBOX_MAX_PARALLEL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub sandbox: SandboxConfig,
}

impl Config {
    pub fn new_from_env() -> Result<Self, AppError> {
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET is not set".to_string()))?;
        if jwt_secret.is_empty() {
            return Err(AppError::Config("JWT_SECRET must not be empty".to_string()));
        }

        let timeout_ms: u64 = parse_or("SANDBOX_TIMEOUT_MS", DEFAULT_SANDBOX_TIMEOUT_MS)?;
        let max_parallel: usize = parse_or("SANDBOX_MAX_PARALLEL", DEFAULT_SANDBOX_MAX_PARALLEL)?;
        if max_parallel == 0 {
            return Err(AppError::Config("SANDBOX_MAX_PARALLEL must be at least 1".to_string()));
        }

        Ok(Self {
            database_url: var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            bind_addr: var_or("BIND_ADDR", DEFAULT_BIND_ADDR),
            jwt_secret,
            sandbox: SandboxConfig {
                program: var_or("SANDBOX_PROGRAM", DEFAULT_SANDBOX_PROGRAM),
                timeout: Duration::from_millis(timeout_ms),
                max_parallel,
            },
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}

fn parse_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {key} value {raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
