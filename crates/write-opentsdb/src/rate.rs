// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rate estimation for counter-like data sources.
//!
//! With `StoreRates` enabled, counter, derive and absolute values are sent as per-second rates.
//! The rates depend on the previous observation of the same sample identity, so the estimator
//! is injected into the writer rather than kept as global state.

use crate::constants::RATE_CACHE_MAX_AGE;
use crate::sample::{Sample, Value};
use fnv::FnvHashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

pub trait RateEstimator: Send + Sync {
    /// Per data source rates of `sample`, or `None` when no rate can be computed yet. Gauges map
    /// to their own value; an individual rate may be NaN.
    fn rates(&self, sample: &Sample) -> Option<Vec<f64>>;
}

#[derive(Debug, Clone)]
struct Observation {
    time: f64,
    values: Vec<Value>,
}

#[derive(Debug, Default)]
struct Observations {
    by_identity: FnvHashMap<String, Observation>,
    last_sweep: f64,
}

impl Observations {
    /// Drops identities whose last observation is older than `max_age` relative to `now`, at
    /// most once per `max_age`.
    fn evict_stale(&mut self, now: f64, max_age: f64) {
        if now - self.last_sweep < max_age {
            return;
        }
        self.last_sweep = now;
        let before = self.by_identity.len();
        self.by_identity
            .retain(|_, observation| now - observation.time < max_age);
        let evicted = before - self.by_identity.len();
        if evicted > 0 {
            debug!("evicted {evicted} stale rate observations");
        }
    }
}

/// Keeps the last raw observation per sample identity. Identities not seen for the maximum
/// age are forgotten; their next sample starts a new history.
#[derive(Debug)]
pub struct CounterRateCache {
    observations: Mutex<Observations>,
    max_age: f64,
}

impl Default for CounterRateCache {
    fn default() -> Self {
        Self::with_max_age(RATE_CACHE_MAX_AGE)
    }
}

impl CounterRateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            observations: Mutex::new(Observations::default()),
            max_age: max_age.as_secs_f64(),
        }
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.observations
            .lock()
            .expect("lock poisoned")
            .by_identity
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Difference between two counter readings, accounting for 32 and 64 bit wraparound.
pub fn counter_diff(old: u64, new: u64) -> u64 {
    if old <= new {
        new - old
    } else if old <= u64::from(u32::MAX) {
        (u64::from(u32::MAX) - old) + new + 1
    } else {
        (u64::MAX - old).wrapping_add(new).wrapping_add(1)
    }
}

fn rate(old: &Value, new: &Value, interval: f64) -> f64 {
    match (old, new) {
        (_, Value::Gauge(v)) => *v,
        (Value::Counter(o), Value::Counter(n)) => counter_diff(*o, *n) as f64 / interval,
        (Value::Derive(o), Value::Derive(n)) => n.wrapping_sub(*o) as f64 / interval,
        (_, Value::Absolute(n)) => *n as f64 / interval,
        _ => f64::NAN,
    }
}

impl RateEstimator for CounterRateCache {
    fn rates(&self, sample: &Sample) -> Option<Vec<f64>> {
        let values: Vec<Value> = sample.values.iter().map(|v| v.value).collect();
        let identity = sample.identity();

        #[allow(clippy::expect_used)]
        let mut observations = self.observations.lock().expect("lock poisoned");

        let Some(previous) = observations.by_identity.get_mut(&identity) else {
            observations.evict_stale(sample.time, self.max_age);
            observations.by_identity.insert(
                identity,
                Observation {
                    time: sample.time,
                    values,
                },
            );
            return None;
        };

        if previous.values.len() != values.len() {
            *previous = Observation {
                time: sample.time,
                values,
            };
            return None;
        }

        let interval = sample.time - previous.time;
        if interval <= 0.0 {
            return None;
        }

        let rates = previous
            .values
            .iter()
            .zip(&values)
            .map(|(old, new)| rate(old, new, interval))
            .collect();
        *previous = Observation {
            time: sample.time,
            values,
        };
        Some(rates)
    }
}
