// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Samples handed over by the collection pipeline.
//!
//! A [`Sample`] is one timestamped measurement of a `plugin/type` pair. It carries one or more
//! typed values, each named after the data source that produced it, and an optional
//! [`MetaData`] set driving name and tag derivation.

use crate::metadata::MetaData;
use derive_more::Display;
use serde::Deserialize;

/// Kind of a data source, as declared by the collector's type database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DsKind {
    #[display("gauge")]
    Gauge,
    #[display("counter")]
    Counter,
    #[display("derive")]
    Derive,
    #[display("absolute")]
    Absolute,
}

/// Raw value of one data source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Gauge(f64),
    Counter(u64),
    Derive(i64),
    Absolute(u64),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gauge(v) => write!(f, "gauge({v})"),
            Self::Counter(v) => write!(f, "counter({v})"),
            Self::Derive(v) => write!(f, "derive({v})"),
            Self::Absolute(v) => write!(f, "absolute({v})"),
        }
    }
}

/// One named value of a sample.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireValue")]
pub struct SampleValue {
    pub name: String,
    pub kind: DsKind,
    pub value: Value,
}

impl SampleValue {
    pub fn gauge(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: DsKind::Gauge,
            value: Value::Gauge(value),
        }
    }

    pub fn counter(name: &str, value: u64) -> Self {
        Self {
            name: name.to_string(),
            kind: DsKind::Counter,
            value: Value::Counter(value),
        }
    }

    pub fn derive(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: DsKind::Derive,
            value: Value::Derive(value),
        }
    }

    pub fn absolute(name: &str, value: u64) -> Self {
        Self {
            name: name.to_string(),
            kind: DsKind::Absolute,
            value: Value::Absolute(value),
        }
    }
}

// JSON shape: {"name": "value", "type": "gauge", "value": 1.5}
#[derive(Deserialize)]
struct WireValue {
    name: String,
    #[serde(rename = "type")]
    kind: DsKind,
    value: serde_json::Number,
}

impl TryFrom<WireValue> for SampleValue {
    type Error = String;

    fn try_from(wire: WireValue) -> Result<Self, Self::Error> {
        let number = &wire.value;
        let value = match wire.kind {
            DsKind::Gauge => number.as_f64().map(Value::Gauge),
            DsKind::Counter => number.as_u64().map(Value::Counter),
            DsKind::Derive => number.as_i64().map(Value::Derive),
            DsKind::Absolute => number.as_u64().map(Value::Absolute),
        }
        .ok_or_else(|| format!("{} is not a valid {} value", number, wire.kind))?;

        Ok(Self {
            name: wire.name,
            kind: wire.kind,
            value,
        })
    }
}

/// A collected measurement event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Sample {
    pub host: String,
    pub plugin: String,
    #[serde(default)]
    pub plugin_instance: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub type_instance: String,
    /// Seconds since the epoch.
    pub time: f64,
    pub values: Vec<SampleValue>,
    #[serde(default)]
    pub meta: Option<MetaData>,
}

impl Sample {
    /// The collector identifier, `host/plugin[-instance]/type[-instance]`.
    pub fn identity(&self) -> String {
        let mut identity = String::with_capacity(
            self.host.len()
                + self.plugin.len()
                + self.plugin_instance.len()
                + self.type_name.len()
                + self.type_instance.len()
                + 4,
        );
        identity.push_str(&self.host);
        identity.push('/');
        identity.push_str(&self.plugin);
        if !self.plugin_instance.is_empty() {
            identity.push('-');
            identity.push_str(&self.plugin_instance);
        }
        identity.push('/');
        identity.push_str(&self.type_name);
        if !self.type_instance.is_empty() {
            identity.push('-');
            identity.push_str(&self.type_instance);
        }
        identity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let mut sample = Sample {
            host: "node1".to_string(),
            plugin: "cpu".to_string(),
            type_name: "idle".to_string(),
            ..Default::default()
        };
        assert_eq!(sample.identity(), "node1/cpu/idle");

        sample.plugin_instance = "0".to_string();
        sample.type_instance = "user".to_string();
        assert_eq!(sample.identity(), "node1/cpu-0/idle-user");
    }

    #[test]
    fn test_deserialize_sample() {
        let sample: Sample = serde_json::from_str(
            r#"{
                "host": "node1",
                "plugin": "interface",
                "plugin_instance": "eth0",
                "type": "if_octets",
                "time": 1700000000.5,
                "values": [
                    {"name": "rx", "type": "derive", "value": -3},
                    {"name": "tx", "type": "counter", "value": 42}
                ],
                "meta": {"tsdb_prefix": "sys."}
            }"#,
        )
        .unwrap();

        assert_eq!(sample.plugin_instance, "eth0");
        assert_eq!(sample.type_instance, "");
        assert_eq!(sample.values[0], SampleValue::derive("rx", -3));
        assert_eq!(sample.values[1], SampleValue::counter("tx", 42));
        assert!(sample.meta.is_some());
    }

    #[test]
    fn test_deserialize_rejects_negative_counter() {
        let result = serde_json::from_str::<SampleValue>(
            r#"{"name": "value", "type": "counter", "value": -1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_gauge_accepts_integers() {
        let value: SampleValue =
            serde_json::from_str(r#"{"name": "value", "type": "gauge", "value": 3}"#).unwrap();
        assert_eq!(value.value, Value::Gauge(3.0));
    }
}
