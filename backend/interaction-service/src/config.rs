/// Configuration management for Interaction Service
///
/// Loads configuration from environment variables.
use anyhow::{bail, Context, Result};
use resilience::presets;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::{CachePolicy, OrchestratorConfig};
use crate::workers::ReconciliationConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// gRPC configuration
    pub grpc: GrpcConfig,
    /// Event queue configuration
    pub kafka: KafkaConfig,
    /// Admission control at the gRPC boundary
    pub admission: AdmissionConfig,
    /// Write-path behaviour
    pub orchestrator: OrchestratorSettings,
    /// Counter reconciliation
    pub worker: WorkerSettings,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port for health checks and metrics
    pub http_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Deadline for a single cache command
    #[serde(default = "default_redis_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

/// gRPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcConfig {
    /// gRPC server port
    pub port: u16,
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Topic carrying interaction events
    pub topic: String,
    /// Consumer group of the reconciliation worker
    pub group_id: String,
    /// Producer client id
    pub client_id: String,
    /// Producer queue timeout per message
    #[serde(default = "default_kafka_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Admission control limits; zero disables a limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub max_requests_per_second: u32,
    pub max_concurrent_requests: usize,
    pub max_concurrent_per_connection: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicyKind {
    Strict,
    BestEffort,
    Retry,
}

impl std::str::FromStr for CachePolicyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(CachePolicyKind::Strict),
            "best_effort" | "best-effort" => Ok(CachePolicyKind::BestEffort),
            "retry" => Ok(CachePolicyKind::Retry),
            other => bail!("unknown cache policy: {:?}", other),
        }
    }
}

/// Write-path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub cache_policy: CachePolicyKind,
    pub list_cache_ttl_secs: u64,
    pub counters_cache_ttl_secs: u64,
}

/// Reconciliation worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub max_batch: usize,
    pub batch_window_ms: u64,
    pub max_consecutive_queue_errors: u32,
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_redis_op_timeout_ms() -> u64 {
    500
}

fn default_kafka_send_timeout_ms() -> u64 {
    5000
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_or("PORT", 8012), // interaction-service default HTTP port
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections()),
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections()),
        };

        let redis = RedisConfig {
            url: std::env::var("REDIS_URL").context("REDIS_URL environment variable not set")?,
            op_timeout_ms: env_or("REDIS_OP_TIMEOUT_MS", default_redis_op_timeout_ms()),
        };

        let grpc = GrpcConfig {
            port: env_or("GRPC_PORT", 50062), // interaction-service default gRPC port
        };

        let brokers =
            std::env::var("KAFKA_BROKERS").context("KAFKA_BROKERS environment variable not set")?;
        if brokers.trim().is_empty() {
            bail!("KAFKA_BROKERS environment variable is empty");
        }
        let topic_prefix =
            std::env::var("KAFKA_TOPIC_PREFIX").unwrap_or_else(|_| "nova".to_string());
        let kafka = KafkaConfig {
            brokers,
            topic: std::env::var("KAFKA_INTERACTION_EVENTS_TOPIC")
                .unwrap_or_else(|_| format!("{}.interaction.events", topic_prefix)),
            group_id: std::env::var("KAFKA_INTERACTION_GROUP_ID")
                .unwrap_or_else(|_| "nova-interaction-reconciler".to_string()),
            client_id: std::env::var("KAFKA_CLIENT_ID")
                .unwrap_or_else(|_| "interaction-service".to_string()),
            send_timeout_ms: env_or("KAFKA_SEND_TIMEOUT_MS", default_kafka_send_timeout_ms()),
        };

        let admission = AdmissionConfig {
            max_requests_per_second: env_or("GRPC_MAX_RPS", 2000),
            max_concurrent_requests: env_or("GRPC_MAX_CONCURRENT_REQUESTS", 1024),
            max_concurrent_per_connection: env_or("GRPC_MAX_CONCURRENT_PER_CONNECTION", 64),
        };

        let cache_policy = match std::env::var("CACHE_INVALIDATION_POLICY") {
            Ok(raw) => raw
                .parse()
                .context("Invalid CACHE_INVALIDATION_POLICY")?,
            Err(_) => CachePolicyKind::Retry,
        };
        let orchestrator = OrchestratorSettings {
            cache_policy,
            list_cache_ttl_secs: env_or("LIST_CACHE_TTL_SECS", 300),
            counters_cache_ttl_secs: env_or("COUNTERS_CACHE_TTL_SECS", 30),
        };

        let worker = WorkerSettings {
            max_batch: env_or("RECONCILE_MAX_BATCH", 500),
            batch_window_ms: env_or("RECONCILE_BATCH_WINDOW_MS", 200),
            max_consecutive_queue_errors: env_or("RECONCILE_MAX_QUEUE_ERRORS", 10),
        };

        Ok(Config {
            app,
            database,
            redis,
            grpc,
            kafka,
            admission,
            orchestrator,
            worker,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let cache_policy = match self.orchestrator.cache_policy {
            CachePolicyKind::Strict => CachePolicy::Strict,
            CachePolicyKind::BestEffort => CachePolicy::BestEffort,
            CachePolicyKind::Retry => CachePolicy::Retry(presets::cache_invalidation()),
        };

        OrchestratorConfig {
            cache_policy,
            list_cache_ttl: Duration::from_secs(self.orchestrator.list_cache_ttl_secs),
            counters_cache_ttl: Duration::from_secs(self.orchestrator.counters_cache_ttl_secs),
            ..OrchestratorConfig::default()
        }
    }

    pub fn reconciliation_config(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            max_batch: self.worker.max_batch.max(1),
            batch_window: Duration::from_millis(self.worker.batch_window_ms),
            max_consecutive_queue_errors: self.worker.max_consecutive_queue_errors,
            ..ReconciliationConfig::default()
        }
    }
}
