//! Facade and backend configuration / 门面与后端配置
//!
//! [`StorageConfig`] and [`ServiceConfig`] are the immutable per-instance
//! settings held by the facades. [`BackendConfig`] is the serde description
//! used to open a backend from a JSON file.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::options::{DefaultPairs, NewServiceOptions, NewStorageOptions, Pair, PairPolicy, PairValue};
use crate::pairs;
use crate::types::{Credential, Endpoint};

/// Storage facade configuration / 存储门面配置
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub name: String,
    pub work_dir: String,
    pub default_pairs: DefaultPairs,
    pub pair_policy: PairPolicy,
}

impl StorageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            work_dir: default_work_dir(),
            ..Default::default()
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_default_pairs(mut self, default_pairs: DefaultPairs) -> Self {
        self.default_pairs = default_pairs;
        self
    }

    pub fn with_pair_policy(mut self, pair_policy: PairPolicy) -> Self {
        self.pair_policy = pair_policy;
        self
    }

    pub fn from_options(opts: &NewStorageOptions) -> Self {
        Self {
            name: opts.name.clone(),
            work_dir: opts.work_dir.clone().unwrap_or_else(default_work_dir),
            default_pairs: opts.default_pairs.clone(),
            pair_policy: opts.pair_policy.clone(),
        }
    }
}

/// Service facade configuration / 服务门面配置
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub default_pairs: DefaultPairs,
    pub pair_policy: PairPolicy,
    /// Defaults handed to every storage the service produces / 生成存储的默认参数
    pub storage_defaults: DefaultPairs,
}

impl ServiceConfig {
    pub fn from_options(opts: &NewServiceOptions) -> Self {
        Self {
            default_pairs: opts.default_pairs.clone(),
            pair_policy: opts.pair_policy.clone(),
            storage_defaults: opts.default_storage_pairs.clone(),
        }
    }

    /// Storage configuration for container `name` / 容器的存储配置
    pub fn storage_config(&self, name: &str, work_dir: &str) -> StorageConfig {
        StorageConfig {
            name: name.to_string(),
            work_dir: work_dir.to_string(),
            default_pairs: self.storage_defaults.clone(),
            pair_policy: self.pair_policy.clone(),
        }
    }
}

fn default_work_dir() -> String {
    "/".to_string()
}

/// Serializable backend description / 后端配置描述
///
/// ```json
/// { "type": "s3", "name": "bucket", "credential": "hmac:ak:sk",
///   "endpoint": "https:s3.example.com", "location": "us-east-1" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub backend_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default)]
    pub pair_policy: PairPolicy,
    /// Listing page size, passed as `<type>_page_size` / 列举分页大小
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<i64>,
}

impl BackendConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        let config: BackendConfig = serde_json::from_str(content).context("Failed to parse backend config")?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read backend config {:?}", path))?;
        let config = Self::from_json(&content)?;
        tracing::info!("Loaded backend config from {:?}", path);
        Ok(config)
    }

    /// Turn the description into `new` pairs / 转换为构造参数
    pub fn into_pairs(self) -> Result<Vec<Pair>> {
        let mut out = vec![
            pairs::with_name(self.name),
            pairs::with_work_dir(self.work_dir),
            pairs::with_pair_policy(self.pair_policy),
        ];
        if let Some(credential) = self.credential {
            out.push(pairs::with_credential(Credential::from_str(&credential)?));
        }
        if let Some(endpoint) = self.endpoint {
            out.push(pairs::with_endpoint(Endpoint::from_str(&endpoint)?));
        }
        if let Some(location) = self.location {
            out.push(pairs::with_location(location));
        }
        if let Some(page_size) = self.page_size {
            out.push(Pair::new(format!("{}_page_size", self.backend_type), PairValue::Int(page_size)));
        }
        Ok(out)
    }
}
