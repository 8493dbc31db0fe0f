//! Build configuration document (C9): JSON schema and validation.
//!
//! Field shape recovered from `BuildConfig` in
//! `examples/original_source/shared/build-config.go`. Missing sub-objects
//! default to empty, matching the original's nil-pointer repair logic in
//! `VCFGHealthCheck` (the interactive "repair this file? y/n" prompt itself
//! is out of scope here — there is no command-line/TUI surface in this
//! core).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_LIST_ENTRIES: usize = 16;
const MAX_SMALL_LIST_ENTRIES: usize = 4;
const MAX_STRING_BYTES: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "appurl")]
    pub app_url: String,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub ntp: NtpConfig,
    #[serde(default)]
    pub redirects: RedirectConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default, rename = "binaryargs")]
    pub binary_args: Vec<String>,
    #[serde(default, rename = "systemenvs")]
    pub system_envs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub cards: Vec<NetworkCard>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkCard {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mask: String,
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskConfig {
    #[serde(default, rename = "filesystem")]
    pub filesystem: String,
    #[serde(default, rename = "maxfd")]
    pub max_fd: u32,
    #[serde(default, rename = "disksize")]
    pub disk_size_mib: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NtpConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(default)]
    pub rules: Vec<Redirect>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Redirect {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub dest: String,
    #[serde(default)]
    pub protocol: String,
}

impl BuildConfig {
    /// Parses and validates a config document in one step, so callers never
    /// see a half-validated `BuildConfig`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let config: BuildConfig =
            serde_json::from_slice(bytes).map_err(|e| Error::config_parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Enforces the count/length caps that mirror the C4 config header's
    /// fixed-size slots (§4.4): violating one of these here means the
    /// encoder would otherwise reject the field deep inside byte packing.
    pub fn validate(&self) -> Result<()> {
        check_str("name", &self.name)?;
        check_str("filesystem", &self.disk.filesystem)?;
        check_str("ntp.hostname", &self.ntp.hostname)?;

        check_list("app.binary_args", &self.app.binary_args, MAX_LIST_ENTRIES)?;
        check_list("app.system_envs", &self.app.system_envs, MAX_LIST_ENTRIES)?;
        check_list("network.dns", &self.network.dns, MAX_SMALL_LIST_ENTRIES)?;
        check_list("network.cards", &self.network.cards, MAX_SMALL_LIST_ENTRIES)?;
        check_list("ntp.servers", &self.ntp.servers, MAX_SMALL_LIST_ENTRIES)?;
        check_list("redirects.rules", &self.redirects.rules, MAX_SMALL_LIST_ENTRIES)?;

        for card in &self.network.cards {
            check_str("network.cards[].ip", &card.ip)?;
            check_str("network.cards[].mask", &card.mask)?;
            check_str("network.cards[].gateway", &card.gateway)?;
        }
        for redirect in &self.redirects.rules {
            check_str("redirects.rules[].src", &redirect.src)?;
            check_str("redirects.rules[].dest", &redirect.dest)?;
            check_str("redirects.rules[].protocol", &redirect.protocol)?;
        }

        Ok(())
    }
}

fn check_str(field: &str, value: &str) -> Result<()> {
    if value.len() + 1 > MAX_STRING_BYTES {
        return Err(Error::invalid_input(format!(
            "{field} exceeds {MAX_STRING_BYTES}-byte slot (nul included)"
        )));
    }
    Ok(())
}

fn check_list<T>(field: &str, items: &[T], max: usize) -> Result<()> {
    if items.len() > max {
        return Err(Error::invalid_input(format!(
            "{field} has {} entries, exceeds cap of {max}",
            items.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let config = BuildConfig::parse(br#"{"name":"demo"}"#).unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.app.binary_args.len(), 0);
        assert_eq!(config.disk.disk_size_mib, 0);
    }

    #[test]
    fn missing_subobjects_default_to_empty() {
        let config = BuildConfig::parse(br#"{}"#).unwrap();
        assert!(config.network.cards.is_empty());
        assert!(config.redirects.rules.is_empty());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(BuildConfig::parse(b"not json").is_err());
    }

    #[test]
    fn rejects_too_many_binary_args() {
        let config = BuildConfig {
            app: AppConfig {
                binary_args: vec!["x".to_string(); 17],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_many_network_cards() {
        let config = BuildConfig {
            network: NetworkConfig {
                cards: vec![NetworkCard::default(); 5],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overlong_name() {
        let config = BuildConfig {
            name: "x".repeat(64),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_name_at_exact_limit() {
        let config = BuildConfig {
            name: "x".repeat(63),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
