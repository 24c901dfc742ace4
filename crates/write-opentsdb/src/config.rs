// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Node` block configuration.
//!
//! The host daemon hands over its configuration tree already parsed into [`ConfigItem`]s. Each
//! `Node` child configures one destination:
//!
//! ```text
//! <Node>
//!   URL "http://localhost:4242"
//!   Timeout 5000
//!   BufferSize 30
//!   JsonHostTag false
//!   StoreRates true
//! </Node>
//! ```

use crate::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_ESCAPE_CHAR, DEFAULT_NODE, PUT_PATH};
use crate::data_point::FormatOptions;
use crate::errors::ConfigError;
use crate::tags::HostTagging;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

/// A single value of a configuration item.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

/// A configuration item: a key, its values, and nested items.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigItem {
    pub key: String,
    pub values: Vec<ConfigValue>,
    pub children: Vec<ConfigItem>,
}

impl ConfigItem {
    pub fn new(key: &str, values: Vec<ConfigValue>) -> Self {
        Self {
            key: key.to_string(),
            values,
            children: Vec::new(),
        }
    }

    pub fn string(key: &str, value: &str) -> Self {
        Self::new(key, vec![ConfigValue::String(value.to_string())])
    }

    pub fn number(key: &str, value: f64) -> Self {
        Self::new(key, vec![ConfigValue::Number(value)])
    }

    pub fn boolean(key: &str, value: bool) -> Self {
        Self::new(key, vec![ConfigValue::Boolean(value)])
    }

    pub fn block(key: &str, children: Vec<ConfigItem>) -> Self {
        Self {
            key: key.to_string(),
            values: Vec::new(),
            children,
        }
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            option: self.key.clone(),
            reason: reason.to_string(),
        }
    }

    fn single_value(&self) -> Result<&ConfigValue, ConfigError> {
        match self.values.as_slice() {
            [value] => Ok(value),
            _ => Err(self.invalid("expected exactly one value")),
        }
    }

    pub fn get_string(&self) -> Result<String, ConfigError> {
        match self.single_value()? {
            ConfigValue::String(s) => Ok(s.clone()),
            _ => Err(self.invalid("expected a string")),
        }
    }

    pub fn get_int(&self) -> Result<i64, ConfigError> {
        match self.single_value()? {
            ConfigValue::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(*n as i64),
            _ => Err(self.invalid("expected an integer")),
        }
    }

    pub fn get_boolean(&self) -> Result<bool, ConfigError> {
        match self.single_value()? {
            ConfigValue::Boolean(b) => Ok(*b),
            ConfigValue::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Ok(true),
                "false" | "no" | "off" => Ok(false),
                _ => Err(self.invalid("expected a boolean")),
            },
            ConfigValue::Number(_) => Err(self.invalid("expected a boolean")),
        }
    }
}

/// Minimum TLS protocol version accepted when talking to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslVersion {
    #[default]
    Default,
    TlsV1,
    TlsV1_0,
    TlsV1_1,
    TlsV1_2,
    TlsV1_3,
}

impl SslVersion {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "tlsv1" => Ok(Self::TlsV1),
            "tlsv1_0" => Ok(Self::TlsV1_0),
            "tlsv1_1" => Ok(Self::TlsV1_1),
            "tlsv1_2" => Ok(Self::TlsV1_2),
            "tlsv1_3" => Ok(Self::TlsV1_3),
            // SSLv2 and SSLv3 are not available with rustls.
            _ => Err(ConfigError::SslVersion(value.to_string())),
        }
    }

    pub fn min_tls_version(self) -> Option<reqwest::tls::Version> {
        match self {
            Self::Default => None,
            Self::TlsV1 | Self::TlsV1_0 => Some(reqwest::tls::Version::TLS_1_0),
            Self::TlsV1_1 => Some(reqwest::tls::Version::TLS_1_1),
            Self::TlsV1_2 => Some(reqwest::tls::Version::TLS_1_2),
            Self::TlsV1_3 => Some(reqwest::tls::Version::TLS_1_3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    pub verify_peer: bool,
    pub verify_host: bool,
    pub ca_cert: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key_pass: Option<String>,
    pub ssl_version: SslVersion,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_peer: true,
            verify_host: true,
            ca_cert: None,
            ca_path: None,
            client_key: None,
            client_cert: None,
            client_key_pass: None,
            ssl_version: SslVersion::Default,
        }
    }
}

/// Settings of one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Full ingestion endpoint, `<URL>/api/put`.
    pub endpoint: String,
    pub timeout: Option<Duration>,
    pub buffer_size: usize,
    pub json_host_tag: bool,
    pub auto_fqdn_fallback: bool,
    pub store_rates: bool,
    pub always_append_ds: bool,
    pub escape_char: char,
    pub tls: TlsConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoint_for(DEFAULT_NODE),
            timeout: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            json_host_tag: false,
            auto_fqdn_fallback: false,
            store_rates: false,
            always_append_ds: false,
            escape_char: DEFAULT_ESCAPE_CHAR,
            tls: TlsConfig::default(),
        }
    }
}

fn endpoint_for(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), PUT_PATH)
}

impl NodeConfig {
    /// Parses the children of a `Node` block. Option names are case-insensitive.
    pub fn from_item(node: &ConfigItem) -> Result<Self, ConfigError> {
        let mut config = NodeConfig::default();

        for child in &node.children {
            match child.key.to_ascii_lowercase().as_str() {
                "url" => config.endpoint = endpoint_for(&child.get_string()?),
                "timeout" => {
                    let ms = child.get_int()?;
                    config.timeout = (ms > 0).then(|| Duration::from_millis(ms as u64));
                }
                "buffersize" => {
                    let size = child.get_int()?;
                    if size < 1 || size > i64::from(i32::MAX) {
                        return Err(child.invalid("must be between 1 and 2147483647"));
                    }
                    config.buffer_size = size as usize;
                }
                "jsonhosttag" => config.json_host_tag = child.get_boolean()?,
                "autofqdnfallback" => config.auto_fqdn_fallback = child.get_boolean()?,
                "storerates" => config.store_rates = child.get_boolean()?,
                "alwaysappendds" => config.always_append_ds = child.get_boolean()?,
                "escapecharacter" => {
                    let value = child.get_string()?;
                    let mut chars = value.chars();
                    config.escape_char = match (chars.next(), chars.next()) {
                        (Some(c), None) if c.is_ascii() => c,
                        _ => return Err(child.invalid("expected a single ASCII character")),
                    };
                }
                "verifypeer" => config.tls.verify_peer = child.get_boolean()?,
                "verifyhost" => config.tls.verify_host = child.get_boolean()?,
                "cacert" => config.tls.ca_cert = Some(child.get_string()?.into()),
                "capath" => config.tls.ca_path = Some(child.get_string()?.into()),
                "clientkey" => config.tls.client_key = Some(child.get_string()?.into()),
                "clientcert" => config.tls.client_cert = Some(child.get_string()?.into()),
                "clientkeypass" => config.tls.client_key_pass = Some(child.get_string()?),
                "sslversion" => config.tls.ssl_version = SslVersion::parse(&child.get_string()?)?,
                _ => return Err(ConfigError::UnknownOption(child.key.clone())),
            }
        }

        Ok(config)
    }

    /// Name under which the destination is registered and logged.
    pub fn name(&self) -> String {
        format!("write_opentsdb/{}", self.endpoint)
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            escape_char: self.escape_char,
            host_tagging: HostTagging {
                json_host_tag: self.json_host_tag,
                auto_fqdn_fallback: self.auto_fqdn_fallback,
            },
            store_rates: self.store_rates,
            always_append_ds: self.always_append_ds,
        }
    }
}

/// The plugin's configuration block. Every `Node` child is parsed on its own; a broken node is
/// reported and skipped without affecting its siblings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginConfig {
    pub nodes: Vec<NodeConfig>,
    pub errors: Vec<ConfigError>,
}

impl PluginConfig {
    pub fn from_items(items: &[ConfigItem]) -> Self {
        let mut config = PluginConfig::default();
        for item in items {
            let node = if item.key.eq_ignore_ascii_case("node") {
                NodeConfig::from_item(item)
            } else {
                Err(ConfigError::UnknownOption(item.key.clone()))
            };
            match node {
                Ok(node) => config.nodes.push(node),
                Err(e) => {
                    error!("{e}");
                    config.errors.push(e);
                }
            }
        }
        config
    }
}
