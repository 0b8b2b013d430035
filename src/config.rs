//! Session configuration
//!
//! Hanya dua parameter: address transport dan ukuran buffer pool.

use crate::error::{HermesError, Result, TransportError};

pub const DEFAULT_ADDRESS: &str = "hermes://127.0.0.1:9999";
pub const DEFAULT_POOL_SIZE: usize = 1024 * 1024; // 1MB

pub const ENV_ADDRESS: &str = "HERMES_ADDRESS";
pub const ENV_POOL_SIZE: &str = "HERMES_POOL_SIZE";

/// Parameter konstruksi [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Transport endpoint, lihat [`Endpoint::parse`].
    pub address: String,
    /// Kapasitas buffer pool dalam bytes, harus > 0.
    pub pool_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn new(address: impl Into<String>, pool_size: usize) -> Self {
        Self {
            address: address.into(),
            pool_size,
        }
    }

    /// Default yang di-override oleh `HERMES_ADDRESS` / `HERMES_POOL_SIZE`.
    ///
    /// Nilai pool size yang tidak bisa di-parse diabaikan.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(address) = std::env::var(ENV_ADDRESS) {
            config.address = address;
        }
        if let Some(size) = std::env::var(ENV_POOL_SIZE)
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            config.pool_size = size;
        }

        config
    }

    /// # Errors
    /// [`HermesError::InvalidPoolSize`] atau [`HermesError::ConnectionFailure`]
    /// untuk address yang tidak valid.
    pub fn validate(&self) -> Result<Endpoint> {
        if self.pool_size == 0 {
            return Err(HermesError::InvalidPoolSize);
        }
        Endpoint::parse(&self.address).map_err(|source| HermesError::ConnectionFailure {
            address: self.address.clone(),
            source,
        })
    }
}

/// Transport endpoint hasil parse address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Broker TCP, `host:port`.
    Tcp(String),
    /// In-process bus dengan nama tertentu.
    Memory(String),
}

impl Endpoint {
    /// Parse `hermes://host:port`, `tcp://host:port`, `host:port`, atau `mem://name`.
    ///
    /// # Errors
    /// [`TransportError::InvalidAddress`] untuk scheme lain atau bagian yang kosong.
    pub fn parse(address: &str) -> std::result::Result<Self, TransportError> {
        let address = address.trim();
        let invalid = || TransportError::InvalidAddress(address.to_string());

        let (scheme, rest) = match address.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, address),
        };

        match scheme {
            Some("mem") => {
                if rest.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Memory(rest.to_string()))
            }
            Some("hermes") | Some("tcp") | None => {
                let rest = rest.trim_end_matches('/');
                match rest.rsplit_once(':') {
                    Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                        Ok(Self::Tcp(rest.to_string()))
                    }
                    _ => Err(invalid()),
                }
            }
            Some(_) => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.pool_size, 1024 * 1024);
        assert_eq!(
            config.validate().unwrap(),
            Endpoint::Tcp("127.0.0.1:9999".into())
        );
    }

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            Endpoint::parse("tcp://localhost:4222").unwrap(),
            Endpoint::Tcp("localhost:4222".into())
        );
        assert_eq!(
            Endpoint::parse("10.0.0.1:9999").unwrap(),
            Endpoint::Tcp("10.0.0.1:9999".into())
        );
        assert_eq!(
            Endpoint::parse("mem://bus-a").unwrap(),
            Endpoint::Memory("bus-a".into())
        );
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["nats://x:1", "mem://", "hermes://host", "host:notaport", ":80", ""] {
            assert!(
                matches!(Endpoint::parse(bad), Err(TransportError::InvalidAddress(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = SessionConfig::new("mem://x", 0);
        assert!(matches!(
            config.validate(),
            Err(HermesError::InvalidPoolSize)
        ));
    }
}
