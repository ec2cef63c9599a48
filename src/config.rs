//! Account configuration, as supplied by the embedding application.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::errors::*;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Plain,
    #[serde(alias = "SSL", alias = "TLS")]
    Tls,
}

impl Default for Security {
    fn default() -> Security {
        Security::Tls
    }
}

/// Timing of the session, in milliseconds.
///
/// The read timeout bounds every blocking read; QUIT uses its own, shorter
/// bound.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub read_ms: u64,
    pub keepalive_ms: u64,
    pub quit_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Timeouts {
        Timeouts {
            read_ms: 30_000,
            keepalive_ms: 30_000,
            quit_ms: 5_000,
        }
    }
}

impl Timeouts {
    /// Every timeout must be positive: a zero read timeout is rejected by
    /// the socket and a zero keep-alive interval would never sleep.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("read_ms", self.read_ms),
            ("keepalive_ms", self.keepalive_ms),
            ("quit_ms", self.quit_ms),
        ];
        match fields.iter().find(|&&(_, ms)| ms == 0) {
            Some(&(name, _)) => {
                Err(ErrorKind::InvalidConfig(format!("timeouts.{} must be positive", name)).into())
            }
            None => Ok(()),
        }
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn quit(&self) -> Duration {
        Duration::from_millis(self.quit_ms)
    }
}

fn default_port() -> u16 {
    995
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AccountConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl AccountConfig {
    pub fn new(host: &str, port: u16, security: Security) -> AccountConfig {
        AccountConfig {
            host: host.to_owned(),
            port: port,
            username: String::new(),
            password: String::new(),
            security: security,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> AccountConfig {
        self.username = username.to_owned();
        self.password = password.to_owned();
        self
    }

    pub fn from_toml_str(s: &str) -> Result<AccountConfig> {
        let account: AccountConfig = toml::from_str(s)?;
        account.timeouts.validate()?;
        Ok(account)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<AccountConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .chain_err(|| format!("reading {}", path.display()))?;
        AccountConfig::from_toml_str(&text)
    }
}
