// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-sample metadata.
//!
//! The naming and tagging code only consumes the [`MetadataStore`] lookup contract. [`MetaData`]
//! is the in-process implementation: an insertion-ordered, key-unique list of typed entries.

use crate::errors::MetadataError;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use std::fmt;

/// Lookup contract for a sample's metadata set.
pub trait MetadataStore {
    /// Returns `Ok(None)` when the key is absent and an error when it holds a non-string value.
    fn get_string(&self, key: &str) -> Result<Option<String>, MetadataError>;

    /// Table of contents, in insertion order.
    fn keys(&self) -> Vec<String>;

    fn exists(&self, key: &str) -> bool;
}

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    String(String),
    SignedInt(i64),
    UnsignedInt(u64),
    Double(f64),
    Boolean(bool),
}

impl<'de> Deserialize<'de> for MetaValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Self::String(s)),
            serde_json::Value::Bool(b) => Ok(Self::Boolean(b)),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Ok(Self::UnsignedInt(u))
                } else if let Some(i) = n.as_i64() {
                    Ok(Self::SignedInt(i))
                } else {
                    Ok(Self::Double(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            other => Err(serde::de::Error::custom(format!(
                "unsupported meta data value: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaData {
    entries: Vec<(String, MetaValue)>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`. A replaced entry keeps its position.
    pub fn insert(&mut self, key: &str, value: MetaValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn insert_string(&mut self, key: &str, value: &str) {
        self.insert(key, MetaValue::String(value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for MetaData {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut meta = MetaData::new();
        for (key, value) in iter {
            meta.insert_string(key, value);
        }
        meta
    }
}

impl MetadataStore for MetaData {
    fn get_string(&self, key: &str) -> Result<Option<String>, MetadataError> {
        match self.get(key) {
            None => Ok(None),
            Some(MetaValue::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(MetadataError::NotAString {
                key: key.to_string(),
            }),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

// Deserialized from a JSON object, keeping the document's key order.
impl<'de> Deserialize<'de> for MetaData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MetaDataVisitor;

        impl<'de> Visitor<'de> for MetaDataVisitor {
            type Value = MetaData;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of meta data entries")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut meta = MetaData::new();
                while let Some((key, value)) = access.next_entry::<String, MetaValue>()? {
                    meta.insert(&key, value);
                }
                Ok(meta)
            }
        }

        deserializer.deserialize_map(MetaDataVisitor)
    }
}
