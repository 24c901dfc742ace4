// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tag derivation.
//!
//! Tags are seeded from the sample host, either as a single `fqdn` tag or, with structured host
//! tags, from a JSON object stored in the host field. Metadata then redirects identifier
//! components into tags and adds free-form tags. OpenTSDB accepts at most 8 tags per data point;
//! this is not enforced here, configurations are expected to stay below it.

use crate::constants::FQDN_TAG;
use crate::directive::{Component, Directives};
use crate::errors::TagError;
use crate::sample::Sample;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, error};

/// Insertion-ordered, key-unique tag mapping. Re-inserting a key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    values: Vec<(String, String)>,
}

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.values.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Tags {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        let mut tags = Tags::new();
        for (k, v) in iter {
            tags.insert(k, v);
        }
        tags
    }
}

impl Serialize for Tags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (k, v) in &self.values {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// How the host field seeds the tag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostTagging {
    /// The host field holds a JSON object of tags.
    pub json_host_tag: bool,
    /// With `json_host_tag`, fall back to `fqdn=<host>` when the host is not a JSON object.
    pub auto_fqdn_fallback: bool,
}

fn host_tags(host: &str, tagging: HostTagging) -> Result<Tags, TagError> {
    let mut tags = Tags::new();
    if !tagging.json_host_tag {
        tags.insert(FQDN_TAG, host);
        return Ok(tags);
    }

    match serde_json::from_str::<serde_json::Value>(host) {
        Ok(serde_json::Value::Object(object)) => {
            for (key, value) in &object {
                match value {
                    serde_json::Value::String(s) => tags.insert(key, s),
                    other => tags.insert(key, &other.to_string()),
                }
            }
            Ok(tags)
        }
        _ if tagging.auto_fqdn_fallback => {
            debug!("Failed to parse json host '{host}', fallback to simple fqdn tag");
            tags.insert(FQDN_TAG, host);
            Ok(tags)
        }
        _ => {
            error!("Failed to parse json host '{host}'");
            Err(TagError::HostParse {
                host: host.to_string(),
            })
        }
    }
}

/// Derives the tag set of one data source of `sample`. Later tags overwrite earlier ones with
/// the same key.
pub fn format_tags(
    sample: &Sample,
    directives: &Directives,
    ds_name: Option<&str>,
    tagging: HostTagging,
) -> Result<Tags, TagError> {
    let mut tags = host_tags(&sample.host, tagging)?;

    if let Some(e) = directives.tag_error(ds_name.is_some()) {
        return Err(e.clone().into());
    }

    for component in Component::ALL {
        let Some(value) = component.value(sample, ds_name) else {
            continue;
        };
        if let Some(key) = directives.retag(component) {
            tags.insert(key, value);
        }
    }

    for (key, value) in directives.added_tags() {
        tags.insert(key, value);
    }

    Ok(tags)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metadata::{MetaData, MetaValue};
    use tracing_test::traced_test;

    const PLAIN: HostTagging = HostTagging {
        json_host_tag: false,
        auto_fqdn_fallback: false,
    };
    const JSON: HostTagging = HostTagging {
        json_host_tag: true,
        auto_fqdn_fallback: false,
    };
    const JSON_WITH_FALLBACK: HostTagging = HostTagging {
        json_host_tag: true,
        auto_fqdn_fallback: true,
    };

    fn sample(host: &str) -> Sample {
        Sample {
            host: host.to_string(),
            plugin: "df".to_string(),
            plugin_instance: "root".to_string(),
            type_name: "df_complex".to_string(),
            type_instance: "free".to_string(),
            ..Default::default()
        }
    }

    fn tags_of(sample: &Sample, ds_name: Option<&str>, tagging: HostTagging) -> Result<Tags, TagError> {
        format_tags(sample, &Directives::parse(sample), ds_name, tagging)
    }

    #[test]
    fn test_plain_host_tag() {
        let tags = tags_of(&sample("node1"), None, PLAIN).unwrap();
        assert_eq!(tags, [("fqdn", "node1")].into_iter().collect());
    }

    #[test]
    fn test_plain_host_is_not_parsed() {
        let tags = tags_of(&sample(r#"{"dc":"us1"}"#), None, PLAIN).unwrap();
        assert_eq!(tags.get("fqdn"), Some(r#"{"dc":"us1"}"#));
    }

    #[test]
    fn test_json_host_tags() {
        let tags = tags_of(&sample(r#"{"dc":"us1","rack":4}"#), None, JSON).unwrap();
        assert_eq!(tags.get("dc"), Some("us1"));
        assert_eq!(tags.get("rack"), Some("4"));
        assert_eq!(tags.get("fqdn"), None);
    }

    #[test]
    fn test_json_host_fallback() {
        let tags = tags_of(&sample("not-json"), None, JSON_WITH_FALLBACK).unwrap();
        assert_eq!(tags, [("fqdn", "not-json")].into_iter().collect());
    }

    #[test]
    #[traced_test]
    fn test_json_host_parse_error() {
        assert_eq!(
            tags_of(&sample("not-json"), None, JSON),
            Err(TagError::HostParse {
                host: "not-json".to_string()
            })
        );
        assert!(logs_contain("Failed to parse json host 'not-json'"));

        // Valid JSON that is not an object is not a tag set.
        assert!(tags_of(&sample("[1,2]"), None, JSON).is_err());
    }

    #[test]
    fn test_retag_components() {
        let mut s = sample("node1");
        s.meta = Some(
            [
                ("tsdb_tag_pluginInstance", "mount"),
                ("tsdb_tag_type", ""),
                ("tsdb_tag_typeInstance", "kind"),
                ("tsdb_tag_dsname", "ds"),
            ]
            .into_iter()
            .collect(),
        );

        let tags = tags_of(&s, None, PLAIN).unwrap();
        assert_eq!(
            tags,
            [("fqdn", "node1"), ("mount", "root"), ("kind", "free")]
                .into_iter()
                .collect()
        );

        let tags = tags_of(&s, Some("value"), PLAIN).unwrap();
        assert_eq!(tags.get("ds"), Some("value"));
        assert_eq!(tags.len(), 4);
    }

    #[test]
    fn test_add_tag() {
        let mut s = sample("node1");
        s.meta = Some(
            [("tsdb_tag_add_status", "ok"), ("tsdb_tag_add_skipped", "")]
                .into_iter()
                .collect(),
        );

        for tagging in [PLAIN, JSON_WITH_FALLBACK] {
            let tags = tags_of(&s, None, tagging).unwrap();
            assert_eq!(tags.get("status"), Some("ok"));
            assert_eq!(tags.get("skipped"), None);
        }
    }

    #[test]
    fn test_last_write_wins() {
        let mut s = sample(r#"{"fqdn":"json-host","env":"prod"}"#);
        s.meta = Some(
            [("tsdb_tag_plugin", "env"), ("tsdb_tag_add_env", "staging")]
                .into_iter()
                .collect(),
        );

        let tags = tags_of(&s, None, JSON).unwrap();
        assert_eq!(tags.get("env"), Some("staging"));
        assert_eq!(tags.get("fqdn"), Some("json-host"));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let mut s = sample(r#"{"dc":"us1"}"#);
        s.meta = Some(
            [("tsdb_tag_type", "t"), ("tsdb_tag_add_a", "b")]
                .into_iter()
                .collect(),
        );
        let directives = Directives::parse(&s);
        let first = format_tags(&s, &directives, Some("value"), JSON).unwrap();
        let second = format_tags(&s, &directives, Some("value"), JSON).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_metadata_error_fails_tags() {
        let mut meta = MetaData::new();
        meta.insert("tsdb_tag_add_count", MetaValue::UnsignedInt(3));
        let mut s = sample("node1");
        s.meta = Some(meta);
        assert!(matches!(
            tags_of(&s, None, PLAIN),
            Err(TagError::Metadata(_))
        ));
    }

    #[test]
    fn test_serializes_in_insertion_order() {
        let tags: Tags = [("z", "1"), ("a", "2"), ("z", "3")].into_iter().collect();
        assert_eq!(serde_json::to_string(&tags).unwrap(), r#"{"z":"3","a":"2"}"#);
    }
}
