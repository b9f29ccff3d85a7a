//! Credential value / 凭证
//!
//! Credentials are passed in as `protocol:value` strings, acquisition is the
//! caller's business.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use super::ParseError;

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `hmac:<access_key>:<secret_key>`
    Hmac { access_key: String, secret_key: String },
    /// `api_key:<key>`
    ApiKey(String),
    /// `file:<path>`, credential file read by the backend / 凭证文件
    File(PathBuf),
    /// `env`, backend reads its own environment variables / 环境变量
    Env,
    /// `basic:<user>:<password>`
    Basic { user: String, password: String },
    /// `base64:<content>`, stored decoded / 已解码
    Base64(Vec<u8>),
}

impl Credential {
    pub fn hmac(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Credential::Hmac {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn protocol(&self) -> &'static str {
        match self {
            Credential::Hmac { .. } => "hmac",
            Credential::ApiKey(_) => "api_key",
            Credential::File(_) => "file",
            Credential::Env => "env",
            Credential::Basic { .. } => "basic",
            Credential::Base64(_) => "base64",
        }
    }
}

impl FromStr for Credential {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseError::new("credential", s, reason);
        let (protocol, rest) = match s.split_once(':') {
            Some((p, r)) => (p, Some(r)),
            None => (s, None),
        };

        match (protocol, rest) {
            ("env", None) => Ok(Credential::Env),
            ("hmac", Some(rest)) => {
                let (ak, sk) = rest.split_once(':').ok_or_else(|| err("expected hmac:<access_key>:<secret_key>"))?;
                if ak.is_empty() || sk.is_empty() {
                    return Err(err("empty access key or secret key"));
                }
                Ok(Credential::hmac(ak, sk))
            }
            ("basic", Some(rest)) => {
                let (user, password) = rest.split_once(':').ok_or_else(|| err("expected basic:<user>:<password>"))?;
                Ok(Credential::Basic {
                    user: user.to_string(),
                    password: password.to_string(),
                })
            }
            ("api_key", Some(key)) if !key.is_empty() => Ok(Credential::ApiKey(key.to_string())),
            ("file", Some(path)) if !path.is_empty() => Ok(Credential::File(PathBuf::from(path))),
            ("base64", Some(content)) => BASE64
                .decode(content)
                .map(Credential::Base64)
                .map_err(|_| err("content is not valid base64")),
            _ => Err(err("unknown protocol or missing value")),
        }
    }
}

// Secrets never reach logs / 日志中不输出密钥
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Hmac { access_key, .. } => write!(f, "Credential::Hmac({}, ***)", access_key),
            Credential::File(path) => write!(f, "Credential::File({:?})", path),
            Credential::Env => f.write_str("Credential::Env"),
            Credential::Basic { user, .. } => write!(f, "Credential::Basic({}, ***)", user),
            other => write!(f, "Credential::{}(***)", other.protocol()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credential() {
        assert_eq!("hmac:ak:sk".parse::<Credential>().unwrap(), Credential::hmac("ak", "sk"));
        assert_eq!("env".parse::<Credential>().unwrap(), Credential::Env);
        assert_eq!(
            "api_key:abc".parse::<Credential>().unwrap(),
            Credential::ApiKey("abc".to_string())
        );
        assert_eq!(
            "base64:aGVsbG8=".parse::<Credential>().unwrap(),
            Credential::Base64(b"hello".to_vec())
        );
        assert!("hmac:only".parse::<Credential>().is_err());
        assert!("token:x".parse::<Credential>().is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let debug = format!("{:?}", Credential::hmac("ak", "very-secret"));
        assert!(!debug.contains("very-secret"));
    }
}
