//! S3 factory / S3驱动工厂

use std::sync::Arc;

use anyhow::Result;

use super::config::{S3Config, CUSTOM_HOST_KEY, FORCE_PATH_STYLE_KEY, PAGE_SIZE_KEY};
use super::driver::S3Storage;
use crate::options::*;
use crate::storage::{BackendFactory, Storager};

pub(super) const NEW_PAIRS: &[KeySpec] = &[
    // every request is signed, so the credential is not optional here
    KeySpec::required(crate::pairs::CREDENTIAL, ValueKind::Credential),
    KeySpec::optional(FORCE_PATH_STYLE_KEY, ValueKind::Bool),
    KeySpec::optional(CUSTOM_HOST_KEY, ValueKind::Str),
    KeySpec::optional(PAGE_SIZE_KEY, ValueKind::Int),
];

/// Storage level only, bucket management is out of reach / 仅存储级别
pub struct S3Factory;

impl BackendFactory for S3Factory {
    fn backend_type(&self) -> &'static str {
        "s3"
    }

    fn new_pairs(&self, _op: Operation) -> &'static [KeySpec] {
        NEW_PAIRS
    }

    fn create_storager(&self, opts: &NewStorageOptions) -> Result<Arc<dyn Storager>> {
        let config = S3Config::from_options(opts)?;
        tracing::info!("S3 driver initialized, bucket: {}, endpoint: {}", config.bucket, config.endpoint);
        Ok(Arc::new(S3Storage::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pairs;
    use crate::storage::Registry;
    use crate::types::Credential;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.register_factory(Arc::new(S3Factory));
        registry
    }

    #[test]
    fn test_new_storager_needs_credential() {
        let err = registry().new_storager("s3", vec![pairs::with_name("b")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairRequired);
        assert_eq!(err.op(), "new");

        // present but not hmac is a backend refusal, not a missing pair
        let err = registry()
            .new_storager("s3", vec![pairs::with_name("b"), pairs::with_credential(Credential::Env)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_new_storager_builds_client() {
        let storage = registry()
            .new_storager(
                "s3",
                vec![
                    pairs::with_name("b"),
                    pairs::with_credential(Credential::hmac("ak", "sk")),
                    pairs::with_endpoint("http:localhost:9000".parse().unwrap()),
                    Pair::new(FORCE_PATH_STYLE_KEY, PairValue::Bool(true)),
                ],
            )
            .unwrap();
        assert_eq!(storage.to_string(), "Storager s3 {name: b, work_dir: /}");
        assert!(storage.capability().can_reach);
        assert!(storage.capability().can_multipart);
    }

    #[test]
    fn test_wrong_extra_type() {
        let err = registry()
            .new_storager(
                "s3",
                vec![pairs::with_name("b"), Pair::new(PAGE_SIZE_KEY, PairValue::Str("many".into()))],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairInvalid);
    }
}
