use crate::error::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub gradient_worker: GradientWorkerConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
}

/// S3-compatible object store connection details.
#[derive(Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_s3_endpoint")]
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Local staging directory for in-flight chunked uploads.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: std::path::PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GradientWorkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_session_secret")]
    pub session_secret: String,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: default_session_secret(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_chunk_size() -> u64 {
    10 * 1024 * 1024
}
fn default_s3_endpoint() -> String {
    "http://localhost:9000".to_string()
}
fn default_s3_region() -> String {
    "us-east-1".to_string()
}
fn default_bucket() -> String {
    "gallery".to_string()
}
fn default_staging_dir() -> std::path::PathBuf {
    std::env::temp_dir()
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_session_secret() -> String {
    "dev-only-insecure-secret".to_string()
}
fn default_session_ttl_secs() -> i64 {
    86_400
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if config_path.is_none() {
            #[cfg(not(debug_assertions))]
            {
                builder = builder
                    .add_source(config::File::with_name("/etc/gallery-core/config").required(false));
            }

            #[cfg(debug_assertions)]
            {
                builder = builder.add_source(config::File::with_name("config").required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        // Double underscore separates nesting levels so a single-underscore
        // field name like `gradient_worker` doesn't get split into a path
        // of its own (e.g. `GALLERY_GRADIENT_WORKER__CONCURRENCY` routes to
        // `gradient_worker.concurrency`, not `gradient.worker.concurrency`).
        builder = builder.add_source(config::Environment::with_prefix("GALLERY").separator("__"));

        let built = builder.build().map_err(|e| Error::Config {
            msg: format!("failed to load configuration: {e}"),
        })?;

        let config: Self = built.try_deserialize().map_err(|e| Error::Config {
            msg: format!("failed to deserialize configuration: {e}"),
        })?;

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                max_chunk_size: default_max_chunk_size(),
            },
            storage: StorageConfig {
                s3_endpoint: default_s3_endpoint(),
                s3_region: default_s3_region(),
                bucket: default_bucket(),
                access_key_id: None,
                secret_access_key: None,
                staging_dir: default_staging_dir(),
            },
            gradient_worker: GradientWorkerConfig {
                enabled: default_true(),
                concurrency: default_concurrency(),
                max_retries: default_max_retries(),
                poll_interval_ms: default_poll_interval_ms(),
            },
            redis: RedisConfig {
                url: default_redis_url(),
            },
            auth: AuthConfig::default(),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_region", &self.s3_region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id.is_some())
            .field("secret_access_key", &self.secret_access_key.is_some())
            .field("staging_dir", &self.staging_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.gradient_worker.max_retries, 5);
        assert!(config.gradient_worker.enabled);
    }

    #[test]
    fn env_override_changes_concurrency() {
        let mut builder = config::Config::builder();
        for (key, value) in [
            ("server.host", "0.0.0.0"),
            ("server.port", "8080"),
            ("server.max_chunk_size", "10485760"),
            ("storage.s3_endpoint", "http://localhost:9000"),
            ("storage.s3_region", "us-east-1"),
            ("storage.bucket", "gallery"),
            ("storage.staging_dir", "/tmp"),
            ("redis.url", "redis://127.0.0.1:6379"),
        ] {
            builder = builder.set_override(key, value).unwrap();
        }

        unsafe {
            std::env::set_var("GALLERY_GRADIENT_WORKER__CONCURRENCY", "9");
        }
        builder = builder.add_source(config::Environment::with_prefix("GALLERY").separator("__"));
        let config: Config = builder.build().unwrap().try_deserialize().unwrap();
        unsafe {
            std::env::remove_var("GALLERY_GRADIENT_WORKER__CONCURRENCY");
        }

        assert_eq!(config.gradient_worker.concurrency, 9);
    }
}
