// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::FormatError;
use crate::sample::{DsKind, SampleValue, Value};

const GAUGE_PRECISION: usize = 15;

/// Renders `value` the way C's `%.15g` does.
pub fn format_gauge(value: f64) -> String {
    if value.is_nan() {
        return if value.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // The exponent after rounding to the requested precision picks the notation.
    let scientific = format!("{:.*e}", GAUGE_PRECISION - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or_default()),
        None => (scientific.as_str(), 0),
    };

    if exponent < -4 || exponent >= GAUGE_PRECISION as i32 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
    } else {
        let decimals = (GAUGE_PRECISION as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Renders one data source value.
///
/// `rates` holds the per data source rates of the sample and is only consulted for non-gauge
/// data sources when `store_rates` is set.
pub fn format_value(
    index: usize,
    sample_value: &SampleValue,
    store_rates: bool,
    rates: Option<&[f64]>,
) -> Result<String, FormatError> {
    let kind_matches = matches!(
        (sample_value.kind, sample_value.value),
        (DsKind::Gauge, Value::Gauge(_))
            | (DsKind::Counter, Value::Counter(_))
            | (DsKind::Derive, Value::Derive(_))
            | (DsKind::Absolute, Value::Absolute(_))
    );
    if !kind_matches {
        return Err(FormatError::KindMismatch {
            kind: sample_value.kind,
            value: sample_value.value.to_string(),
        });
    }

    match sample_value.value {
        Value::Gauge(v) => Ok(format_gauge(v)),
        _ if store_rates => rates
            .and_then(|r| r.get(index).copied())
            .filter(|r| !r.is_nan())
            .map(format_gauge)
            .ok_or(FormatError::RateUnavailable { index }),
        Value::Counter(v) | Value::Absolute(v) => Ok(v.to_string()),
        Value::Derive(v) => Ok(v.to_string()),
    }
}
