//! Service configuration, read once at startup from environment variables.
//!
//! Parsing goes through a lookup function so tests can feed a map instead of
//! mutating the process environment.

use std::time::Duration;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_AUTHORS_TOPIC: &str = "authors:changes";
const DEFAULT_POSTS_QUEUE: &str = "posts:changes";
const DEFAULT_CONSUMER_GROUP: &str = "authors.total_posts";
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 300;
const DEFAULT_POSTS_BASE_URL: &str = "http://localhost:3001/posts";
const DEFAULT_POSTS_FUNCTION: &str = "posts-service";
const DEFAULT_POSTS_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 3_600;
const DEFAULT_BLOB_ROOT: &str = "./uploads";
const DEFAULT_BLOB_PUBLIC_URL: &str = "http://localhost:8080/uploads";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be set when {reason}")]
    Missing { name: &'static str, reason: &'static str },

    #[error("{name} has an invalid value `{value}`: {message}")]
    Invalid {
        name: &'static str,
        value: String,
        message: String,
    },
}

/// Deployment environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Production,
    Other(String),
}

impl Stage {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Stage::Production,
            other => Stage::Other(other.to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Stage::Production)
    }
}

/// How the posts service is queried for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostsTransportConfig {
    /// Plain `GET <base_url>?authors=...`.
    Http { base_url: String },
    /// Direct function invocation with a synthetic gateway request.
    ///
    /// With `invoke_url` set the invoke REST path of that endpoint is called
    /// unsigned (local function emulators); without it the cloud SDK client is
    /// used with credentials from the default provider chain.
    DirectInvoke {
        invoke_url: Option<String>,
        function_name: String,
    },
}

/// Persistent backends (Postgres + Redis Streams).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub database_url: String,
    pub redis_url: String,
}

/// Bus topology shared by the publisher and the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub authors_topic: String,
    pub posts_queue: String,
    pub consumer_group: String,
    pub dedup_window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobConfig {
    pub root: String,
    pub public_url: String,
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub stage: Stage,
    pub bind_addr: String,
    /// `None` runs every backend in memory (dev/test).
    pub persistence: Option<PersistenceConfig>,
    pub bus: BusConfig,
    pub posts_transport: PostsTransportConfig,
    pub posts_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub blobs: BlobConfig,
}

impl ServiceConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup (environment, map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let stage = Stage::parse(&or("STAGE", "dev"));

        let use_persistent = parse_bool("USE_PERSISTENT_STORES", get("USE_PERSISTENT_STORES"))?;
        let persistence = if use_persistent {
            let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing {
                name: "DATABASE_URL",
                reason: "USE_PERSISTENT_STORES=true",
            })?;
            Some(PersistenceConfig {
                database_url,
                redis_url: or("REDIS_URL", DEFAULT_REDIS_URL),
            })
        } else {
            None
        };

        let posts_transport = if stage.is_production() {
            PostsTransportConfig::DirectInvoke {
                invoke_url: get("FUNCTION_INVOKE_URL"),
                function_name: or("POSTS_FUNCTION_NAME", DEFAULT_POSTS_FUNCTION),
            }
        } else {
            PostsTransportConfig::Http {
                base_url: or("POSTS_BASE_URL", DEFAULT_POSTS_BASE_URL),
            }
        };

        Ok(Self {
            stage,
            bind_addr: or("BIND_ADDR", DEFAULT_BIND_ADDR),
            persistence,
            bus: BusConfig {
                authors_topic: or("AUTHORS_TOPIC", DEFAULT_AUTHORS_TOPIC),
                posts_queue: or("POSTS_QUEUE", DEFAULT_POSTS_QUEUE),
                consumer_group: or("CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP),
                dedup_window: Duration::from_secs(parse_u64(
                    "DEDUP_WINDOW_SECS",
                    get("DEDUP_WINDOW_SECS"),
                    DEFAULT_DEDUP_WINDOW_SECS,
                )?),
            },
            posts_transport,
            posts_timeout: Duration::from_millis(parse_u64(
                "POSTS_TIMEOUT_MS",
                get("POSTS_TIMEOUT_MS"),
                DEFAULT_POSTS_TIMEOUT_MS,
            )?),
            idempotency_ttl: Duration::from_secs(parse_u64(
                "IDEMPOTENCY_TTL_SECS",
                get("IDEMPOTENCY_TTL_SECS"),
                DEFAULT_IDEMPOTENCY_TTL_SECS,
            )?),
            blobs: BlobConfig {
                root: or("BLOB_ROOT", DEFAULT_BLOB_ROOT),
                public_url: or("BLOB_PUBLIC_URL", DEFAULT_BLOB_PUBLIC_URL),
            },
        })
    }

    /// In-memory defaults for tests and local runs.
    pub fn in_memory() -> Self {
        Self {
            stage: Stage::Other("dev".to_string()),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            persistence: None,
            bus: BusConfig {
                authors_topic: DEFAULT_AUTHORS_TOPIC.to_string(),
                posts_queue: DEFAULT_POSTS_QUEUE.to_string(),
                consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
                dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            },
            posts_transport: PostsTransportConfig::Http {
                base_url: DEFAULT_POSTS_BASE_URL.to_string(),
            },
            posts_timeout: Duration::from_millis(DEFAULT_POSTS_TIMEOUT_MS),
            idempotency_ttl: Duration::from_secs(DEFAULT_IDEMPOTENCY_TTL_SECS),
            blobs: BlobConfig {
                root: DEFAULT_BLOB_ROOT.to_string(),
                public_url: DEFAULT_BLOB_PUBLIC_URL.to_string(),
            },
        }
    }
}

fn parse_bool(name: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    match raw {
        None => Ok(false),
        Some(v) => v.trim().to_ascii_lowercase().parse::<bool>().map_err(|e| ConfigError::Invalid {
            name,
            value: v,
            message: e.to_string(),
        }),
    }
}

fn parse_u64(name: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
            name,
            value: v,
            message: e.to_string(),
        }),
    }
}
