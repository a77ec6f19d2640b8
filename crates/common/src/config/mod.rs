//! Configuration management for Reef services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Well-known provider variables (OPENAI_API_KEY, STRIPE_SECRET_KEY, ...)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat model configuration (titles, claim extraction, angle generation)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Payment provider configuration
    #[serde(default)]
    pub payments: PaymentsConfig,

    /// Credit costs and starting balance
    #[serde(default)]
    pub credits: CreditsConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum JSON body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat provider: openai, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key for the chat completions endpoint
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model used for every chat call
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the auth provider
    pub jwt_secret: Option<String>,

    /// Expected `aud` claim
    #[serde(default = "default_jwt_audience")]
    pub audience: String,

    /// Lifetime of tokens minted by `JwtManager::generate_token`
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,

    /// Whether lazily created profiles start whitelisted
    #[serde(default)]
    pub whitelist_new_profiles: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentsConfig {
    /// Payment provider: stripe, mock
    #[serde(default = "default_payments_provider")]
    pub provider: String,

    /// Stripe secret API key
    pub secret_key: Option<String>,

    /// Stripe webhook signing secret (`whsec_...`)
    pub webhook_secret: Option<String>,

    /// Stripe API base URL
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,

    /// Origin used for checkout redirect URLs when the request has none
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Accepted clock skew for webhook signatures
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,

    /// Capacity of the recently-processed session cache
    #[serde(default = "default_processed_cache_size")]
    pub processed_cache_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreditsConfig {
    /// Balance given to a lazily created profile
    #[serde(default = "default_starting_balance")]
    pub starting_balance: i32,

    /// Cost of creating a search
    #[serde(default = "default_cost")]
    pub search_cost: i32,

    /// Cost of a claim-extraction stage
    #[serde(default = "default_cost")]
    pub extraction_cost: i32,

    /// Cost of an angle-generation stage
    #[serde(default = "default_cost")]
    pub generation_cost: i32,
}

/// A fixed window: `limit` requests per `window_secs`
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct WindowLimit {
    pub limit: u32,
    pub window_secs: u64,
}

impl WindowLimit {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Process-wide requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity of the process-wide bucket
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// How often expired windows are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_search_create_limit")]
    pub search_create: WindowLimit,

    #[serde(default = "default_parse_document_limit")]
    pub parse_document: WindowLimit,

    #[serde(default = "default_search_read_limit")]
    pub search_read: WindowLimit,

    #[serde(default = "default_checkout_limit")]
    pub checkout: WindowLimit,

    #[serde(default = "default_pearl_limit")]
    pub pearl: WindowLimit,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_max_body_bytes() -> usize { 1024 * 1024 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_upstream_timeout() -> u64 { 30 }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_jwt_audience() -> String { "authenticated".to_string() }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_payments_provider() -> String { "stripe".to_string() }
fn default_stripe_api_base() -> String { "https://api.stripe.com/v1".to_string() }
fn default_public_base_url() -> String { "http://localhost:3000".to_string() }
fn default_webhook_tolerance() -> u64 { 300 }
fn default_processed_cache_size() -> usize { 1024 }
fn default_starting_balance() -> i32 { 100 }
fn default_cost() -> i32 { 1 }
fn default_enabled() -> bool { true }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_sweep_interval() -> u64 { 300 }
fn default_search_create_limit() -> WindowLimit { WindowLimit::new(10, 60) }
fn default_parse_document_limit() -> WindowLimit { WindowLimit::new(20, 60) }
fn default_search_read_limit() -> WindowLimit { WindowLimit::new(60, 60) }
fn default_checkout_limit() -> WindowLimit { WindowLimit::new(10, 60) }
fn default_pearl_limit() -> WindowLimit { WindowLimit::new(10, 60) }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "reef".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            // Provider variables win when present
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("embedding.api_key", std::env::var("OPENAI_API_KEY").ok())?
            .set_override_option("llm.api_key", std::env::var("OPENAI_API_KEY").ok())?
            .set_override_option("payments.secret_key", std::env::var("STRIPE_SECRET_KEY").ok())?
            .set_override_option(
                "payments.webhook_secret",
                std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
            )?
            .set_override_option("auth.jwt_secret", std::env::var("SUPABASE_JWT_SECRET").ok())?

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Timeout for Pearl routes: never shorter than every upstream call a
    /// chain can make back to back (one embedding, a title, one extraction
    /// per paper and the generation).
    pub fn pipeline_timeout(&self) -> Duration {
        let llm_calls = crate::pearl::MAX_PAPERS as u64 + 2;
        let upstream = self.embedding.timeout_secs + self.llm.timeout_secs * llm_calls;
        Duration::from_secs(self.server.request_timeout_secs.max(upstream))
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Configuration wired to in-process mocks, used by tests and local demos
    pub fn for_tests() -> Self {
        let mut config = Self::default();
        config.embedding.provider = "mock".to_string();
        config.llm.provider = "mock".to_string();
        config.payments.provider = "mock".to_string();
        config.payments.webhook_secret = Some("whsec_test".to_string());
        config.auth.jwt_secret = Some("test-secret".to_string());
        config.observability.metrics_port = 0;
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/reef".to_string(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            audience: default_jwt_audience(),
            jwt_expiration_secs: default_jwt_expiration(),
            whitelist_new_profiles: false,
        }
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            provider: default_payments_provider(),
            secret_key: None,
            webhook_secret: None,
            api_base: default_stripe_api_base(),
            public_base_url: default_public_base_url(),
            webhook_tolerance_secs: default_webhook_tolerance(),
            processed_cache_size: default_processed_cache_size(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            search_cost: default_cost(),
            extraction_cost: default_cost(),
            generation_cost: default_cost(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            sweep_interval_secs: default_sweep_interval(),
            search_create: default_search_create_limit(),
            parse_document: default_parse_document_limit(),
            search_read: default_search_read_limit(),
            checkout: default_checkout_limit(),
            pearl: default_pearl_limit(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            auth: AuthConfig::default(),
            payments: PaymentsConfig::default(),
            credits: CreditsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
