use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub max_upload_size: u64,
    pub snapshot_interval_secs: u64,
    pub max_versions: usize,
    /// 0 means "pick from the hardware" (2x available cores).
    pub worker_count: usize,
    pub job_queue_capacity: usize,
    pub batch_timeout_secs: u64,
    pub log_level: String,
    pub cors_allowed_origins: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_env("PORT", 8080),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "/data".into()),
            max_upload_size: parse_env("MAX_UPLOAD_SIZE", 104_857_600),
            snapshot_interval_secs: parse_env("SNAPSHOT_INTERVAL_SECS", 300),
            max_versions: parse_env("MAX_VERSIONS", 100),
            worker_count: parse_env("WORKER_COUNT", 0),
            job_queue_capacity: parse_env("JOB_QUEUE_CAPACITY", 256),
            batch_timeout_secs: parse_env("BATCH_TIMEOUT_SECS", 300),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".into()),
        }
    }

    /// Configuration rooted at `data_dir` with every other knob at its default.
    pub fn with_data_dir(data_dir: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: data_dir.into(),
            max_upload_size: 104_857_600,
            snapshot_interval_secs: 300,
            max_versions: 100,
            worker_count: 0,
            job_queue_capacity: 256,
            batch_timeout_secs: 300,
            log_level: "info".into(),
            cors_allowed_origins: "*".into(),
        }
    }

    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get() * 2
        } else {
            self.worker_count
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("storage")
    }

    pub fn staging_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("staging")
    }

    pub fn versions_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("versions").join("objects")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("inbox")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("metadata")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.metadata_dir().join("snapshot.bin")
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.metadata_dir().join("wal")
    }

    pub fn routing_rules_path(&self) -> PathBuf {
        self.metadata_dir().join("routing_rules.json")
    }

    pub fn deletion_log_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
            .join("audit")
            .join("deletion_log.ndjson")
    }

    pub fn rename_log_path(&self) -> PathBuf {
        self.metadata_dir().join("rename_log.ndjson")
    }

    pub fn move_log_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
            .join("media")
            .join("move_log.ndjson")
    }

    pub fn ingest_log_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
            .join("media")
            .join("ingest_log.ndjson")
    }

    /// Directories that must exist before the engine opens.
    pub fn required_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.storage_dir(),
            self.staging_dir(),
            self.versions_dir(),
            self.inbox_dir(),
            self.metadata_dir(),
            self.wal_dir(),
        ]
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
