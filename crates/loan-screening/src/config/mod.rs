use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::screening::RelinkStrategy;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub assets: AssetConfig,
    pub screening: ScreeningConfig,
    pub cbs: Option<CbsConfig>,
    pub geo: Option<GeoConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "8040".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let ansi = environment == AppEnvironment::Development;

        let assets = AssetConfig {
            directory: PathBuf::from(
                env::var("ASSETS_DIR").unwrap_or_else(|_| "./assets".to_string()),
            ),
            public_url: env::var("ASSETS_URL")
                .unwrap_or_else(|_| format!("http://{host}:{port}/assets/")),
            max_file_size: parse_number("ASSETS_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?,
        };

        let relink_strategy = match env::var("SCREENING_RELINK_STRATEGY") {
            Ok(raw) => RelinkStrategy::parse(&raw)
                .ok_or(ConfigError::InvalidRelinkStrategy { value: raw })?,
            Err(_) => RelinkStrategy::default(),
        };
        let seed_template = env::var("SCREENING_SEED_TEMPLATE")
            .map(|raw| !matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let cbs = match (
            env::var("CBS_URL"),
            env::var("CBS_USERNAME"),
            env::var("CBS_PASSWORD"),
        ) {
            (Ok(url), Ok(username), Ok(password)) => Some(CbsConfig {
                url,
                username,
                password,
                device_id: env::var("CBS_DEVICE_ID")
                    .unwrap_or_else(|_| "loan-screening".to_string()),
                timeout: Duration::from_secs(parse_number(
                    "CBS_TIMEOUT_SECS",
                    DEFAULT_CBS_TIMEOUT_SECS,
                )?),
            }),
            _ => None,
        };

        let geo = env::var("GEO_WPS_URL").ok().map(|url| GeoConfig { url });

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level, ansi },
            assets,
            screening: ScreeningConfig {
                relink_strategy,
                seed_template,
            },
            cbs,
            geo,
        })
    }
}

const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;
const DEFAULT_CBS_TIMEOUT_SECS: u64 = 30;

fn parse_number(variable: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Where uploaded client documents (ID cards, pictures) are written and served from.
#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub directory: PathBuf,
    pub public_url: String,
    pub max_file_size: u64,
}

/// Screening workflow knobs.
#[derive(Debug, Clone, Copy)]
pub struct ScreeningConfig {
    pub relink_strategy: RelinkStrategy,
    pub seed_template: bool,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            relink_strategy: RelinkStrategy::default(),
            seed_template: true,
        }
    }
}

/// Core banking (Abacus) connection settings.
#[derive(Clone)]
pub struct CbsConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub device_id: String,
    pub timeout: Duration,
}

impl fmt::Debug for CbsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CbsConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("device_id", &self.device_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Parcel validation (WPS) endpoint.
#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub url: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
    InvalidRelinkStrategy { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a non-negative integer")
            }
            ConfigError::InvalidRelinkStrategy { value } => write!(
                f,
                "SCREENING_RELINK_STRATEGY must be 'question_text' or 'source_id' (found '{value}')"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidRelinkStrategy { .. } => None,
        }
    }
}
