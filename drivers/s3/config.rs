//! S3 backend configuration / S3配置

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::options::{NewStorageOptions, ParsedPairs};
use crate::types::{Credential, Endpoint};

pub(super) const FORCE_PATH_STYLE_KEY: &str = "s3_force_path_style";
pub(super) const CUSTOM_HOST_KEY: &str = "s3_custom_host";
pub(super) const PAGE_SIZE_KEY: &str = "s3_page_size";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name, taken from the storage name / 存储桶名称
    pub bucket: String,
    /// Endpoint URL
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix inside the bucket / 存储桶内的根目录
    #[serde(default = "default_root")]
    pub root_path: String,
    /// CDN host used instead of presigned URLs / 自定义域名
    #[serde(default)]
    pub custom_host: String,
    /// MinIO and friends need path style / 强制路径风格
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_root() -> String {
    "/".to_string()
}

fn default_page_size() -> usize {
    1000
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: String::new(),
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            root_path: default_root(),
            custom_host: String::new(),
            force_path_style: false,
            page_size: default_page_size(),
        }
    }
}

impl S3Config {
    pub fn from_options(opts: &NewStorageOptions) -> Result<Self> {
        let (access_key_id, secret_access_key) = match &opts.credential {
            Some(Credential::Hmac { access_key, secret_key }) => (access_key.clone(), secret_key.clone()),
            Some(other) => return Err(anyhow!("s3 needs an hmac credential, got {}", other.protocol())),
            None => return Err(anyhow!("s3 needs an hmac credential")),
        };
        let region = opts.location.clone().unwrap_or_else(default_region);
        let endpoint = match &opts.endpoint {
            Some(Endpoint::File(_)) => return Err(anyhow!("s3 endpoint must be http or https")),
            Some(endpoint) => endpoint.url(),
            None => format!("https://s3.{}.amazonaws.com", region),
        };

        let mut config = Self {
            bucket: opts.name.clone(),
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            root_path: opts.work_dir.clone().unwrap_or_else(default_root),
            ..Default::default()
        };
        config.apply_extra(&opts.extra);
        Ok(config)
    }

    fn apply_extra(&mut self, extra: &ParsedPairs) {
        if let Some(force) = extra.get_bool(FORCE_PATH_STYLE_KEY) {
            self.force_path_style = force;
        }
        if let Some(host) = extra.get_str(CUSTOM_HOST_KEY) {
            self.custom_host = host.to_string();
        }
        if let Some(page_size) = extra.get_int(PAGE_SIZE_KEY) {
            self.page_size = page_size.clamp(1, 1000) as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{parse, OperationOptions, Pair, PairValue};
    use crate::pairs;

    fn options(pairs: Vec<Pair>) -> NewStorageOptions {
        let extras = super::super::factory::NEW_PAIRS;
        NewStorageOptions::from_parsed(parse(NewStorageOptions::KEYS, extras, pairs, false).unwrap())
    }

    #[test]
    fn test_from_options_defaults() {
        let config = S3Config::from_options(&options(vec![
            pairs::with_name("photos"),
            pairs::with_credential(Credential::hmac("ak", "sk")),
        ]))
        .unwrap();
        assert_eq!(config.bucket, "photos");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint, "https://s3.us-east-1.amazonaws.com");
        assert_eq!(config.root_path, "/");
        assert_eq!(config.page_size, 1000);
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_from_options_extras() {
        let config = S3Config::from_options(&options(vec![
            pairs::with_name("photos"),
            pairs::with_credential(Credential::hmac("ak", "sk")),
            pairs::with_endpoint("http:localhost:9000".parse().unwrap()),
            pairs::with_location("cn-east-1"),
            pairs::with_work_dir("/backup/"),
            Pair::new(FORCE_PATH_STYLE_KEY, PairValue::Bool(true)),
            Pair::new(PAGE_SIZE_KEY, PairValue::Int(5000)),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, "http://localhost:9000");
        assert_eq!(config.region, "cn-east-1");
        assert_eq!(config.root_path, "/backup/");
        assert_eq!(config.page_size, 1000);
        assert!(config.force_path_style);
    }

    #[test]
    fn test_credential_must_be_hmac() {
        let err = S3Config::from_options(&options(vec![
            pairs::with_name("photos"),
            pairs::with_credential(Credential::Env),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("hmac"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: S3Config =
            serde_json::from_str(r#"{"bucket":"b","endpoint":"http://minio:9000","access_key_id":"a","secret_access_key":"s"}"#)
                .unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.page_size, 1000);
    }
}
