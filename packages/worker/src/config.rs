use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{MqAppConfig, RetentionAppConfig};

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Unique identifier for this worker instance. Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Job chains processed concurrently. Default: 4.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_concurrency() -> usize {
    4
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
        }
    }
}

/// Record store connection.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// sea-orm connection URL. Default: "sqlite://autofeedback.db?mode=rwc".
    /// Workers sharing one queue must share one database, e.g. a postgres URL.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://autofeedback.db?mode=rwc".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// How the external build process is launched and where its reports land.
#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Build tool executable. Default: "mvn".
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments; `{settings}` and `{policy}` are replaced by the file paths below.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Absolute path of the build settings file. Required before any build spawns.
    #[serde(default)]
    pub settings_file: Option<PathBuf>,
    /// Absolute path of the security policy file. Required before any build spawns.
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    /// Wall-clock limit per build. Default: 600.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How often the running build is checked. Default: 1000.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Project descriptor marking the build root. Default: "pom.xml".
    #[serde(default = "default_descriptor_name")]
    pub descriptor_name: String,
    /// Variables copied from the worker's environment into the build's.
    #[serde(default = "default_inherited_env")]
    pub inherited_env: Vec<String>,
    /// Set to "1" in the build environment.
    #[serde(default = "default_feedback_env_var")]
    pub feedback_env_var: String,
    /// JUnit reports, relative to the build root. Only `TEST-*.xml` directly inside are collected.
    #[serde(default = "default_junit_dir")]
    pub junit_dir: String,
    /// Coverage report trees, collected recursively.
    #[serde(default = "default_coverage_dirs")]
    pub coverage_dirs: Vec<String>,
    /// Mutation report trees, collected recursively.
    #[serde(default = "default_mutation_dirs")]
    pub mutation_dirs: Vec<String>,
}

fn default_program() -> String {
    "mvn".into()
}
fn default_args() -> Vec<String> {
    [
        "-B",
        "-s",
        "{settings}",
        "-Djava.security.manager",
        "-Djava.security.policy=={policy}",
        "test",
    ]
    .map(String::from)
    .to_vec()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_descriptor_name() -> String {
    "pom.xml".into()
}
fn default_inherited_env() -> Vec<String> {
    ["PATH", "HOME", "JAVA_HOME", "M2_HOME", "MAVEN_OPTS", "LANG"]
        .map(String::from)
        .to_vec()
}
fn default_feedback_env_var() -> String {
    "AUTOFEEDBACK".into()
}
fn default_junit_dir() -> String {
    "target/surefire-reports".into()
}
fn default_coverage_dirs() -> Vec<String> {
    vec!["target/site/jacoco".into()]
}
fn default_mutation_dirs() -> Vec<String> {
    vec!["target/pit-reports".into()]
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            settings_file: None,
            policy_file: None,
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            descriptor_name: default_descriptor_name(),
            inherited_env: default_inherited_env(),
            feedback_env_var: default_feedback_env_var(),
            junit_dir: default_junit_dir(),
            coverage_dirs: default_coverage_dirs(),
            mutation_dirs: default_mutation_dirs(),
        }
    }
}

/// Blob storage for archives and artifacts.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Default: "./data/blobs".
    #[serde(default = "default_blob_path")]
    pub blob_path: PathBuf,
    /// Largest blob accepted. Default: 256 MiB.
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
    /// Artifacts larger than this are stored gzip-compressed. Default: 64 KiB.
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold: u64,
}

fn default_blob_path() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_max_blob_size() -> u64 {
    256 * 1024 * 1024
}
fn default_compress_threshold() -> u64 {
    64 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_path: default_blob_path(),
            max_blob_size: default_max_blob_size(),
            compress_threshold: default_compress_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Total uncompressed bytes an archive may expand to. Default: 512 MiB.
    #[serde(default = "default_max_uncompressed_size")]
    pub max_uncompressed_size: u64,
}

fn default_max_uncompressed_size() -> u64 {
    512 * 1024 * 1024
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_uncompressed_size: default_max_uncompressed_size(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionAppConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("AUTOFEEDBACK_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("worker.id", "worker-1")?
            .set_default("worker.concurrency", 4_i64)?
            .set_default("database.url", "sqlite://autofeedback.db?mode=rwc")?
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.pool_size", 5_i64)?
            .set_default("mq.queue_name", "pipeline_jobs")?
            .set_default("build.timeout_secs", 600_i64)?
            .set_default("retention.keep_latest", 0_i64)?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(
                Environment::with_prefix("AUTOFEEDBACK")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("build.args")
                    .with_list_parse_key("build.inherited_env")
                    .with_list_parse_key("build.coverage_dirs")
                    .with_list_parse_key("build.mutation_dirs"),
            )
            .build()?;

        s.try_deserialize()
    }
}
