//! Endpoint value / 端点
//!
//! Format: `http:<host>[:<port>]`, `https:<host>[:<port>]` or `file:<path>`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Http { host: String, port: u16 },
    Https { host: String, port: u16 },
    File(PathBuf),
}

impl Endpoint {
    pub fn protocol(&self) -> &'static str {
        match self {
            Endpoint::Http { .. } => "http",
            Endpoint::Https { .. } => "https",
            Endpoint::File(_) => "file",
        }
    }

    /// Render as URL, default ports omitted / 转换为URL
    pub fn url(&self) -> String {
        match self {
            Endpoint::Http { host, port: 80 } => format!("http://{}", host),
            Endpoint::Http { host, port } => format!("http://{}:{}", host, port),
            Endpoint::Https { host, port: 443 } => format!("https://{}", host),
            Endpoint::Https { host, port } => format!("https://{}:{}", host, port),
            Endpoint::File(path) => format!("file://{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseError::new("endpoint", s, reason);
        let (protocol, rest) = s.split_once(':').ok_or_else(|| err("expected <protocol>:<value>"))?;
        if rest.is_empty() {
            return Err(err("missing value"));
        }

        let host_port = |default: u16| -> Result<(String, u16), ParseError> {
            match rest.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port.parse::<u16>().map_err(|_| err("port is not a number"))?;
                    Ok((host.to_string(), port))
                }
                None => Ok((rest.to_string(), default)),
            }
        };

        match protocol {
            "http" => host_port(80).map(|(host, port)| Endpoint::Http { host, port }),
            "https" => host_port(443).map(|(host, port)| Endpoint::Https { host, port }),
            "file" => Ok(Endpoint::File(PathBuf::from(rest))),
            _ => Err(err("unknown protocol")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Http { host, port } | Endpoint::Https { host, port } => {
                write!(f, "{}:{}:{}", self.protocol(), host, port)
            }
            Endpoint::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}
