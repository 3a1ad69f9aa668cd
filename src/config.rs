/// Configuration management for Review Desk
use crate::error::{DeskError, DeskResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub rate_limit: RateLimitSettings,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
///
/// Tokens are issued by the external auth layer; the desk only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
    /// Moderation requests a single student may submit per minute
    pub submissions_per_minute: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives
    pub level: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> DeskResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("DESK_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("DESK_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| DeskError::Validation("Invalid port number".to_string()))?;
        let version =
            env::var("DESK_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("DESK_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("DESK_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("review_desk.sqlite"));

        let jwt_secret = env::var("DESK_JWT_SECRET")
            .map_err(|_| DeskError::Validation("JWT secret required".to_string()))?;

        let log_level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "review_desk=debug,tower_http=debug".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig { jwt_secret },
            rate_limit: RateLimitSettings {
                enabled: env_or("DESK_RATE_LIMITS_ENABLED", true),
                authenticated_rps: env_or("DESK_RATE_LIMIT_AUTHENTICATED_RPS", 100),
                unauthenticated_rps: env_or("DESK_RATE_LIMIT_UNAUTHENTICATED_RPS", 10),
                burst_size: env_or("DESK_RATE_LIMIT_BURST", 50),
                submissions_per_minute: env_or("DESK_SUBMISSIONS_PER_MINUTE", 20),
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> DeskResult<()> {
        if self.service.hostname.is_empty() {
            return Err(DeskError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(DeskError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.rate_limit.submissions_per_minute == 0 {
            return Err(DeskError::Validation(
                "Submission quota must be at least 1 per minute".to_string(),
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(DeskError::Validation(format!(
                "Invalid log filter: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Configuration for tests and local tooling: in-memory friendly, limits relaxed
    pub fn for_testing(jwt_secret: &str) -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                database: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                jwt_secret: jwt_secret.to_string(),
            },
            rate_limit: RateLimitSettings {
                enabled: false,
                authenticated_rps: 1000,
                unauthenticated_rps: 1000,
                burst_size: 1000,
                submissions_per_minute: 1000,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
            },
        }
    }
}
