use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{TcshareError, TcshareResult};
use crate::frame::FrameLayout;

/// Top-level configuration (loaded from tcshare.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcshareConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address for ranged retrieval (default: 127.0.0.1:8080)
    pub listen: String,
    /// TCP listen address for the upload channel (default: 127.0.0.1:8081)
    pub upload_listen: String,
    /// Prometheus metrics endpoint (served on the HTTP listener when set)
    pub metrics: bool,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Directory holding stored objects, one file per id
    pub storage_dir: PathBuf,
    /// Upload sessions idle longer than this are aborted
    pub upload_idle_timeout_secs: u64,
    /// Writer buffer in bytes; a full buffer suspends the session until disk catches up
    pub write_buffer_bytes: usize,
}

/// Which transport/storage backend the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// tcshared: ranged HTTP reads + lockstep upload channel
    SelfHosted,
    /// S3-compatible object store via OpenDAL
    ObjectStore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Base URL of the self-hosted HTTP API
    pub server_url: String,
    /// host:port of the self-hosted upload channel
    pub upload_addr: String,
    /// Mix server-supplied randomness into IVs and keys
    pub remote_entropy: bool,
    /// S3 endpoint (object_store backend)
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix for uploaded objects
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Object store append batch size in bytes
    pub append_size: usize,
    /// Lifetime of presigned share links, when the service supports them
    pub share_ttl_secs: u64,
}

/// Argon2id parameters for password keys
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

/// Field widths and limits consumed by the transfer protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub iv_length: usize,
    pub salt_length: usize,
    pub auth_tag_length: usize,
    /// 16 (AES-128-GCM) or 32 (AES-256-GCM)
    pub key_length: usize,
    /// Wire chunk size, tag included on the final chunk
    pub chunk_size: usize,
    /// Per-transfer cap on stored bytes (0 = unlimited)
    pub max_file_size: u64,
    pub kdf: KdfConfig,
}

impl TransferConfig {
    /// Check the field widths before any session uses them.
    pub fn validate(&self) -> TcshareResult<()> {
        if self.iv_length == 0 {
            return Err(TcshareError::Config("iv_length must be > 0".into()));
        }
        if self.salt_length == 0 {
            return Err(TcshareError::Config("salt_length must be > 0".into()));
        }
        if !(12..=16).contains(&self.auth_tag_length) {
            return Err(TcshareError::Config(format!(
                "auth_tag_length must be 12..=16, got {}",
                self.auth_tag_length
            )));
        }
        if self.key_length != 16 && self.key_length != 32 {
            return Err(TcshareError::Config(format!(
                "key_length must be 16 or 32, got {}",
                self.key_length
            )));
        }
        // A body segment must never be the 1-byte end-of-upload sentinel
        if self.chunk_size < self.auth_tag_length + 2 {
            return Err(TcshareError::Config(format!(
                "chunk_size ({}) must be at least auth_tag_length + 2 ({})",
                self.chunk_size,
                self.auth_tag_length + 2
            )));
        }
        Ok(())
    }

    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.iv_length, self.salt_length, self.auth_tag_length)
    }

    /// Plaintext bytes per encrypted chunk, leaving room for the tag.
    pub fn plaintext_chunk_size(&self) -> usize {
        self.chunk_size - self.auth_tag_length
    }

    pub fn size_limit(&self) -> Option<u64> {
        (self.max_file_size > 0).then_some(self.max_file_size)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            upload_listen: "127.0.0.1:8081".into(),
            metrics: true,
            log_level: "info".into(),
            log_format: "text".into(),
            storage_dir: PathBuf::from("/var/lib/tcshared/objects"),
            upload_idle_timeout_secs: 60,
            write_buffer_bytes: 256 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::SelfHosted,
            server_url: "http://127.0.0.1:8080".into(),
            upload_addr: "127.0.0.1:8081".into(),
            remote_entropy: true,
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "tcshare".into(),
            prefix: "uploads".into(),
            enforce_tls: false,
            append_size: 8 * 1024 * 1024,
            share_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            iv_length: 12,
            salt_length: 16,
            auth_tag_length: 16,
            key_length: 32,
            chunk_size: 64 * 1024,
            max_file_size: 2 * 1024 * 1024 * 1024,
            kdf: KdfConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
listen = "0.0.0.0:9000"
upload_listen = "0.0.0.0:9001"
log_level = "debug"
log_format = "json"
storage_dir = "/srv/tcshare"
upload_idle_timeout_secs = 5

[storage]
backend = "object_store"
endpoint = "https://s3.example.com:8333"
region = "us-west-2"
bucket = "my-bucket"
enforce_tls = true

[transfer]
iv_length = 16
salt_length = 16
chunk_size = 1048576
max_file_size = 1000

[transfer.kdf]
mem_cost_kib = 1024
time_cost = 1
parallelism = 1
"#;
        let config: TcshareConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.listen, "0.0.0.0:9000");
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.daemon.storage_dir, PathBuf::from("/srv/tcshare"));
        assert_eq!(config.daemon.upload_idle_timeout_secs, 5);
        assert_eq!(config.storage.backend, Backend::ObjectStore);
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.bucket, "my-bucket");
        assert_eq!(config.transfer.iv_length, 16);
        assert_eq!(config.transfer.chunk_size, 1048576);
        assert_eq!(config.transfer.size_limit(), Some(1000));
        assert_eq!(config.transfer.kdf.mem_cost_kib, 1024);
        assert!(config.transfer.validate().is_ok());
    }

    #[test]
    fn test_parse_defaults() {
        let config: TcshareConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.listen, "127.0.0.1:8080");
        assert_eq!(config.storage.backend, Backend::SelfHosted);
        assert!(config.storage.remote_entropy);
        assert_eq!(config.transfer.iv_length, 12);
        assert_eq!(config.transfer.auth_tag_length, 16);
        assert_eq!(config.transfer.key_length, 32);
        assert_eq!(config.transfer.plaintext_chunk_size(), 64 * 1024 - 16);
        assert_eq!(config.transfer.kdf.mem_cost_kib, 65536);
        assert!(config.transfer.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[transfer]
key_length = 16
"#;
        let config: TcshareConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.transfer.key_length, 16);
        // Defaults
        assert_eq!(config.transfer.salt_length, 16);
        assert_eq!(config.storage.server_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_validate_rejects_bad_widths() {
        let mut t = TransferConfig {
            key_length: 24,
            ..Default::default()
        };
        assert!(t.validate().is_err());

        t.key_length = 32;
        t.auth_tag_length = 8;
        assert!(t.validate().is_err());

        t.auth_tag_length = 16;
        t.chunk_size = 16;
        assert!(t.validate().is_err());

        t.chunk_size = 64;
        t.iv_length = 0;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_chunk_size_leaves_room_for_two_plaintext_bytes() {
        let mut t = TransferConfig {
            chunk_size: 17,
            ..Default::default()
        };
        assert_eq!(t.auth_tag_length, 16);
        assert!(matches!(t.validate(), Err(TcshareError::Config(_))));

        t.chunk_size = 18;
        assert!(t.validate().is_ok());
        assert_eq!(t.plaintext_chunk_size(), 2);
    }

    #[test]
    fn test_unlimited_size() {
        let t = TransferConfig {
            max_file_size: 0,
            ..Default::default()
        };
        assert_eq!(t.size_limit(), None);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = TcshareConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: TcshareConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.daemon.storage_dir, parsed.daemon.storage_dir);
        assert_eq!(config.storage.backend, parsed.storage.backend);
        assert_eq!(config.transfer.chunk_size, parsed.transfer.chunk_size);
    }
}
