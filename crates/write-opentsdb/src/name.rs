// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric name derivation.
//!
//! The name is `prefix + plugin[.plugin_instance].type[.type_instance][.ds_name]`, where every
//! component can be dropped through metadata, or `prefix + tsdb_id` when an id override is set.
//! The result is escaped so it only holds characters OpenTSDB accepts in a metric name.

use crate::constants::MAX_METRIC_NAME_LEN;
use crate::directive::{Component, Directives};
use crate::errors::FormatError;
use crate::sample::Sample;

/// Bounded string builder. Once a push fails the builder is left unchanged.
#[derive(Debug)]
struct NameBuilder {
    buf: String,
    capacity: usize,
}

impl NameBuilder {
    fn new(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            capacity,
        }
    }

    fn push(&mut self, s: &str) -> Result<(), FormatError> {
        if self.buf.len() + s.len() > self.capacity {
            return Err(FormatError::Capacity {
                capacity: self.capacity,
            });
        }
        self.buf.push_str(s);
        Ok(())
    }

    fn push_component(&mut self, s: &str) -> Result<(), FormatError> {
        if self.buf.len() + 1 + s.len() > self.capacity {
            return Err(FormatError::Capacity {
                capacity: self.capacity,
            });
        }
        self.buf.push('.');
        self.buf.push_str(s);
        Ok(())
    }
}

/// Derives the escaped metric name of one data source of `sample`.
pub fn format_name(
    sample: &Sample,
    directives: &Directives,
    ds_name: Option<&str>,
    escape_char: char,
) -> Result<String, FormatError> {
    format_name_with_capacity(sample, directives, ds_name, escape_char, MAX_METRIC_NAME_LEN)
}

fn format_name_with_capacity(
    sample: &Sample,
    directives: &Directives,
    ds_name: Option<&str>,
    escape_char: char,
    capacity: usize,
) -> Result<String, FormatError> {
    if let Some(e) = directives.name_error() {
        return Err(e.clone().into());
    }

    let mut builder = NameBuilder::new(capacity);
    builder.push(directives.prefix().unwrap_or_default())?;

    if let Some(id) = directives.id_override() {
        builder.push(id)?;
    } else {
        if !directives.is_suppressed(Component::Plugin) {
            builder.push(&sample.plugin)?;
        }
        for component in [
            Component::PluginInstance,
            Component::Type,
            Component::TypeInstance,
            Component::DsName,
        ] {
            if directives.is_suppressed(component) {
                continue;
            }
            let Some(value) = component.value(sample, ds_name) else {
                continue;
            };
            // Type is part of the name even when empty.
            if value.is_empty() && component != Component::Type {
                continue;
            }
            builder.push_component(value)?;
        }
    }

    Ok(escape_metric_name(&builder.buf, escape_char))
}

/// Whether OpenTSDB accepts `c` in a metric name.
pub fn is_valid_metric_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '-' | '_' | '.' | '/')
        || (!c.is_ascii() && c.is_alphabetic())
}

/// Replaces every character outside the metric name alphabet with `escape_char`. Consecutive
/// separators are left as they are.
pub fn escape_metric_name(name: &str, escape_char: char) -> String {
    name.chars()
        .map(|c| if is_valid_metric_char(c) { c } else { escape_char })
        .collect()
}
