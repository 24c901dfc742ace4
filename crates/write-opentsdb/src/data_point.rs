// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Assembly of wire data points from samples.
//!
//! Every data source of a sample becomes one [`DataPoint`]. Name, value and tags are derived
//! independently per data source; a failure only drops that data source.

use crate::constants::DEFAULT_ESCAPE_CHAR;
use crate::directive::Directives;
use crate::errors::PointError;
use crate::name::format_name;
use crate::rate::RateEstimator;
use crate::sample::{DsKind, Sample};
use crate::tags::{format_tags, HostTagging, Tags};
use crate::value::format_value;
use serde::Serialize;
use tracing::error;

/// One OpenTSDB `/api/put` entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp: f64,
    pub metric: String,
    pub value: String,
    pub tags: Tags,
}

/// Per-destination settings consumed while assembling data points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatOptions {
    pub escape_char: char,
    pub host_tagging: HostTagging,
    pub store_rates: bool,
    /// Append the data source name even when the sample has a single value.
    pub always_append_ds: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            escape_char: DEFAULT_ESCAPE_CHAR,
            host_tagging: HostTagging::default(),
            store_rates: false,
            always_append_ds: false,
        }
    }
}

/// Outcome for one data source index of a sample.
pub type PointOutcome = (usize, Result<DataPoint, PointError>);

/// Builds the data points of `sample`, one outcome per data source in order.
pub fn assemble(
    sample: &Sample,
    options: &FormatOptions,
    rate_estimator: Option<&dyn RateEstimator>,
) -> Vec<PointOutcome> {
    let directives = Directives::parse(sample);

    let needs_rates =
        options.store_rates && sample.values.iter().any(|v| v.kind != DsKind::Gauge);
    let rates = if needs_rates {
        rate_estimator.and_then(|estimator| estimator.rates(sample))
    } else {
        None
    };

    let append_ds = options.always_append_ds || sample.values.len() > 1;

    sample
        .values
        .iter()
        .enumerate()
        .map(|(index, sample_value)| {
            let ds_name = append_ds.then_some(sample_value.name.as_str());
            let point = assemble_one(
                sample,
                &directives,
                options,
                index,
                ds_name,
                rates.as_deref(),
            );
            if let Err(e) = &point {
                error!(
                    "{} (host={}, plugin={}, type={}, ds={})",
                    e, sample.host, sample.plugin, sample.type_name, sample_value.name
                );
            }
            (index, point)
        })
        .collect()
}

fn assemble_one(
    sample: &Sample,
    directives: &Directives,
    options: &FormatOptions,
    index: usize,
    ds_name: Option<&str>,
    rates: Option<&[f64]>,
) -> Result<DataPoint, PointError> {
    let metric =
        format_name(sample, directives, ds_name, options.escape_char).map_err(PointError::Name)?;
    let value = format_value(index, &sample.values[index], options.store_rates, rates)
        .map_err(PointError::Value)?;
    let tags = format_tags(sample, directives, ds_name, options.host_tagging)?;

    Ok(DataPoint {
        timestamp: sample.time,
        metric,
        value,
        tags,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::{FormatError, TagError};
    use crate::rate::CounterRateCache;
    use crate::sample::{SampleValue, Value};

    fn cpu_sample(values: Vec<SampleValue>) -> Sample {
        Sample {
            host: "node1".to_string(),
            plugin: "cpu".to_string(),
            type_name: "idle".to_string(),
            time: 1_700_000_000.25,
            values,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_value_point() {
        let sample = cpu_sample(vec![SampleValue::gauge("value", 99.5)]);
        let outcomes = assemble(&sample, &FormatOptions::default(), None);

        assert_eq!(outcomes.len(), 1);
        let point = outcomes[0].1.as_ref().unwrap();
        assert_eq!(point.metric, "cpu.idle");
        assert_eq!(point.value, "99.5");
        assert_eq!(point.timestamp, 1_700_000_000.25);
        assert_eq!(point.tags, [("fqdn", "node1")].into_iter().collect());

        let json = serde_json::to_value(point).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "timestamp": 1_700_000_000.25,
                "metric": "cpu.idle",
                "value": "99.5",
                "tags": {"fqdn": "node1"}
            })
        );
    }

    #[test]
    fn test_multi_value_appends_ds_name() {
        let sample = cpu_sample(vec![
            SampleValue::derive("rx", 10),
            SampleValue::derive("tx", 20),
        ]);
        let outcomes = assemble(&sample, &FormatOptions::default(), None);
        let metrics: Vec<_> = outcomes
            .iter()
            .map(|(_, p)| p.as_ref().unwrap().metric.clone())
            .collect();
        assert_eq!(metrics, vec!["cpu.idle.rx", "cpu.idle.tx"]);
    }

    #[test]
    fn test_always_append_ds() {
        let sample = cpu_sample(vec![SampleValue::gauge("value", 1.0)]);
        let options = FormatOptions {
            always_append_ds: true,
            ..Default::default()
        };
        let outcomes = assemble(&sample, &options, None);
        assert_eq!(outcomes[0].1.as_ref().unwrap().metric, "cpu.idle.value");
    }

    #[test]
    fn test_failed_index_does_not_abort_siblings() {
        let sample = cpu_sample(vec![
            SampleValue {
                name: "broken".to_string(),
                kind: DsKind::Counter,
                value: Value::Gauge(1.0),
            },
            SampleValue::counter("ok", 5),
        ]);
        let outcomes = assemble(&sample, &FormatOptions::default(), None);

        assert!(matches!(
            outcomes[0],
            (0, Err(PointError::Value(FormatError::KindMismatch { .. })))
        ));
        assert_eq!(outcomes[1].1.as_ref().unwrap().value, "5");
    }

    #[test]
    fn test_store_rates() {
        let cache = CounterRateCache::new();
        let options = FormatOptions {
            store_rates: true,
            ..Default::default()
        };

        let mut sample = cpu_sample(vec![SampleValue::counter("value", 100)]);
        let outcomes = assemble(&sample, &options, Some(&cache));
        assert_eq!(
            outcomes[0].1,
            Err(PointError::Value(FormatError::RateUnavailable { index: 0 }))
        );

        sample.time += 10.0;
        sample.values = vec![SampleValue::counter("value", 150)];
        let outcomes = assemble(&sample, &options, Some(&cache));
        assert_eq!(outcomes[0].1.as_ref().unwrap().value, "5");
    }

    #[test]
    fn test_host_parse_error_skips_point() {
        let sample = cpu_sample(vec![SampleValue::gauge("value", 1.0)]);
        let options = FormatOptions {
            host_tagging: HostTagging {
                json_host_tag: true,
                auto_fqdn_fallback: false,
            },
            ..Default::default()
        };
        let outcomes = assemble(&sample, &options, None);
        assert!(matches!(
            outcomes[0].1,
            Err(PointError::Tags(TagError::HostParse { .. }))
        ));
    }
}
