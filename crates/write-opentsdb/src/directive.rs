// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of the metadata keys that steer naming and tagging.
//!
//! A sample's metadata is scanned once into [`Directives`]; the name and tag formatters only
//! query the result. Recognized keys:
//!
//! - `tsdb_prefix`: prepended to the metric name (also to `tsdb_id`)
//! - `tsdb_id`: replaces the derived metric name
//! - `tsdb_tag_plugin`, `tsdb_tag_pluginInstance`, `tsdb_tag_type`, `tsdb_tag_typeInstance`,
//!   `tsdb_tag_dsname`: drop the component from the metric name; a non-empty value is the key
//!   of a tag carrying the component
//! - `tsdb_tag_add_<key>`: adds the tag `<key>=<value>`

use crate::constants::{
    META_ID, META_PREFIX, META_TAG_ADD_PREFIX, META_TAG_DS_NAME, META_TAG_PLUGIN,
    META_TAG_PLUGIN_INSTANCE, META_TAG_TYPE, META_TAG_TYPE_INSTANCE,
};
use crate::errors::MetadataError;
use crate::metadata::MetadataStore;
use crate::sample::Sample;
use derive_more::Display;
use tracing::error;

/// A metric identifier component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Component {
    #[display("plugin")]
    Plugin,
    #[display("plugin_instance")]
    PluginInstance,
    #[display("type")]
    Type,
    #[display("type_instance")]
    TypeInstance,
    #[display("ds_name")]
    DsName,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Plugin,
        Component::PluginInstance,
        Component::Type,
        Component::TypeInstance,
        Component::DsName,
    ];

    pub fn meta_key(self) -> &'static str {
        match self {
            Component::Plugin => META_TAG_PLUGIN,
            Component::PluginInstance => META_TAG_PLUGIN_INSTANCE,
            Component::Type => META_TAG_TYPE,
            Component::TypeInstance => META_TAG_TYPE_INSTANCE,
            Component::DsName => META_TAG_DS_NAME,
        }
    }

    pub fn from_meta_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.meta_key() == key)
    }

    /// The component's value in `sample`. `DsName` resolves to `ds_name`.
    pub fn value<'a>(self, sample: &'a Sample, ds_name: Option<&'a str>) -> Option<&'a str> {
        match self {
            Component::Plugin => Some(&sample.plugin),
            Component::PluginInstance => Some(&sample.plugin_instance),
            Component::Type => Some(&sample.type_name),
            Component::TypeInstance => Some(&sample.type_instance),
            Component::DsName => ds_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Prefix(String),
    IdOverride(String),
    Suppress(Component),
    Retag(Component, String),
    AddTag(String, String),
}

/// Directives of one sample, plus any read failures attributed to the formatter that needs them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directives {
    directives: Vec<Directive>,
    name_error: Option<MetadataError>,
    tag_errors: Vec<(Option<Component>, MetadataError)>,
}

impl Directives {
    pub fn parse(sample: &Sample) -> Self {
        match &sample.meta {
            Some(meta) => Self::from_store(meta, sample),
            None => Self::default(),
        }
    }

    pub fn from_store(store: &impl MetadataStore, sample: &Sample) -> Self {
        let mut parsed = Self::default();

        for key in store.keys() {
            if key == META_PREFIX || key == META_ID {
                match store.get_string(&key) {
                    Ok(Some(value)) if key == META_PREFIX => {
                        parsed.directives.push(Directive::Prefix(value))
                    }
                    Ok(Some(value)) => parsed.directives.push(Directive::IdOverride(value)),
                    Ok(None) => {}
                    Err(e) => {
                        parsed.name_error.get_or_insert(e);
                    }
                }
            } else if let Some(component) = Component::from_meta_key(&key) {
                parsed.directives.push(Directive::Suppress(component));
                match store.get_string(&key) {
                    Ok(Some(value)) if !value.is_empty() => {
                        parsed.directives.push(Directive::Retag(component, value))
                    }
                    Ok(_) => {}
                    Err(e) => parsed.tag_errors.push((Some(component), e)),
                }
            } else if let Some(tag_key) = key.strip_prefix(META_TAG_ADD_PREFIX) {
                if tag_key.is_empty() {
                    error!(
                        "meta_data tag '{}' is unknown (host={}, plugin={}, type={})",
                        key, sample.host, sample.plugin, sample.type_name
                    );
                    continue;
                }
                match store.get_string(&key) {
                    Ok(Some(value)) if !value.is_empty() => parsed
                        .directives
                        .push(Directive::AddTag(tag_key.to_string(), value)),
                    Ok(_) => {}
                    Err(e) => parsed.tag_errors.push((None, e)),
                }
            }
        }

        parsed
    }

    pub fn prefix(&self) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::Prefix(p) => Some(p.as_str()),
            _ => None,
        })
    }

    pub fn id_override(&self) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::IdOverride(id) => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn is_suppressed(&self, component: Component) -> bool {
        self.directives
            .iter()
            .any(|d| *d == Directive::Suppress(component))
    }

    pub fn retag(&self, component: Component) -> Option<&str> {
        self.directives.iter().find_map(|d| match d {
            Directive::Retag(c, key) if *c == component => Some(key.as_str()),
            _ => None,
        })
    }

    /// `tsdb_tag_add_*` tags, in metadata order.
    pub fn added_tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.directives.iter().filter_map(|d| match d {
            Directive::AddTag(k, v) => Some((k.as_str(), v.as_str())),
            _ => None,
        })
    }

    pub fn name_error(&self) -> Option<&MetadataError> {
        self.name_error.as_ref()
    }

    /// First read failure relevant to tag derivation. The data source name tag key is only
    /// read when the data source name takes part in the data point.
    pub fn tag_error(&self, with_ds_name: bool) -> Option<&MetadataError> {
        self.tag_errors
            .iter()
            .find(|(c, _)| with_ds_name || *c != Some(Component::DsName))
            .map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter()
    }
}
