use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use bcrypt::DEFAULT_COST;

/// Mirrors bcrypt's (private) minimum accepted cost.
pub(crate) const MIN_COST: u32 = 4;
/// Mirrors bcrypt's (private) maximum accepted cost.
pub(crate) const MAX_COST: u32 = 31;
use log::warn;

use crate::rate_limit::RateLimitPolicy;

pub const DEFAULT_BIND: &str = "0.0.0.0:2052";

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub tls: Option<TlsPaths>,
    /// Empty means any origin is accepted.
    pub allowed_origins: Vec<String>,
    pub rate_limits: RateLimitPolicy,
    /// bcrypt cost for new password hashes.
    pub password_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_bind: SocketAddr = DEFAULT_BIND.parse().unwrap_or(([0, 0, 0, 0], 2052).into());
        let bind = match lookup("CHAT_BIND") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("Ignoring CHAT_BIND={raw:?}: {e}");
                default_bind
            }),
            None => default_bind,
        };

        let tls = match (lookup("CHAT_TLS_CERT"), lookup("CHAT_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => {
                warn!("CHAT_TLS_CERT and CHAT_TLS_KEY must be set together; serving without TLS");
                None
            }
        };

        let mut allowed_origins: Vec<String> = lookup("CHAT_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(origin) = lookup("PRODUCTION_ORIGIN") {
            allowed_origins.push(origin);
        }

        let password_cost = match lookup("CHAT_PASSWORD_COST") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(cost) if (MIN_COST..=MAX_COST).contains(&cost) => cost,
                _ => {
                    warn!(
                        "Ignoring CHAT_PASSWORD_COST={raw:?}: expected {MIN_COST}..={MAX_COST}"
                    );
                    DEFAULT_COST
                }
            },
            None => DEFAULT_COST,
        };

        Self {
            bind,
            tls,
            allowed_origins,
            rate_limits: RateLimitPolicy::with_overrides(&lookup),
            password_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Operation;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind.port(), 2052);
        assert!(config.tls.is_none());
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.password_cost, DEFAULT_COST);
        assert_eq!(
            config.rate_limits.limit_for(Operation::ListChats),
            Operation::ListChats.default_limit()
        );
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("CHAT_BIND", "127.0.0.1:9000"),
            ("CHAT_TLS_CERT", "cert.pem"),
            ("CHAT_TLS_KEY", "key.pem"),
            ("CHAT_ALLOWED_ORIGINS", "http://localhost:3000, http://127.0.0.1:3000"),
            ("PRODUCTION_ORIGIN", "https://chat.example.com"),
            ("RATE_LIMIT_SEND_MESSAGE", "7"),
            ("CHAT_PASSWORD_COST", "10"),
        ]);
        assert_eq!(config.password_cost, 10);
        assert_eq!(config.bind, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.tls.unwrap().key, PathBuf::from("key.pem"));
        assert_eq!(config.allowed_origins.len(), 3);
        assert_eq!(
            config
                .rate_limits
                .limit_for(Operation::SendMessage)
                .unwrap()
                .limit,
            7
        );
    }

    #[test]
    fn test_bad_bind_and_half_tls_fall_back() {
        let config = config(&[
            ("CHAT_BIND", "nowhere"),
            ("CHAT_TLS_CERT", "cert.pem"),
            ("CHAT_PASSWORD_COST", "2"),
        ]);
        assert_eq!(config.bind.port(), 2052);
        assert!(config.tls.is_none());
        assert_eq!(config.password_cost, DEFAULT_COST);
    }
}
