// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One configured OpenTSDB node: its batch buffer and the flush pipeline in front of it.
//!
//! Appends and flushes are serialized through a single async mutex. The HTTP request is made
//! while the mutex is held, so at most one flush per destination is in flight and no point is
//! appended to a batch that is being shipped.

use crate::buffer::BatchBuffer;
use crate::config::NodeConfig;
use crate::constants::ERROR_LOG_INTERVAL;
use crate::data_point::{assemble, FormatOptions};
use crate::errors::{ConfigError, PointError, ShippingError};
use crate::rate::{CounterRateCache, RateEstimator};
use crate::sample::Sample;
use crate::transport::{HttpTransport, Transport};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Rate limits delivery error logs to one burst per interval, counting failures in between.
#[derive(Debug)]
pub struct ErrorLogLimiter {
    interval: Duration,
    last_log: Option<Instant>,
    failures: u32,
}

impl ErrorLogLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_log: None,
            failures: 0,
        }
    }

    /// Records a failed flush. Returns the number of failures since the last log when this one
    /// should be logged.
    pub fn record_failure(&mut self, now: Instant) -> Option<u32> {
        self.failures = self.failures.saturating_add(1);
        match self.last_log {
            Some(last) if now.saturating_duration_since(last) <= self.interval => None,
            _ => {
                self.last_log = Some(now);
                Some(std::mem::take(&mut self.failures))
            }
        }
    }
}

impl Default for ErrorLogLimiter {
    fn default() -> Self {
        Self::new(ERROR_LOG_INTERVAL)
    }
}

/// Result of shipping one batch.
#[derive(Debug)]
pub struct FlushReport {
    pub points: usize,
    pub result: Result<(), ShippingError>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per data source outcome of [`Destination::write`], plus the flushes it triggered.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub outcomes: Vec<(usize, Result<(), PointError>)>,
    pub flushes: Vec<FlushReport>,
}

impl WriteReport {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &PointError)> {
        self.outcomes
            .iter()
            .filter_map(|(index, r)| r.as_ref().err().map(|e| (*index, e)))
    }

    /// Every data point was buffered and every triggered flush succeeded.
    pub fn is_ok(&self) -> bool {
        self.written() == self.outcomes.len() && self.flushes.iter().all(FlushReport::is_ok)
    }
}

struct State {
    buffer: BatchBuffer,
    error_log: ErrorLogLimiter,
}

pub struct Destination {
    name: String,
    options: FormatOptions,
    transport: Arc<dyn Transport>,
    rate_estimator: Arc<dyn RateEstimator>,
    state: Mutex<State>,
}

impl Destination {
    pub fn new(
        name: String,
        options: FormatOptions,
        buffer_size: usize,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name,
            options,
            transport,
            rate_estimator: Arc::new(CounterRateCache::new()),
            state: Mutex::new(State {
                buffer: BatchBuffer::new(buffer_size),
                error_log: ErrorLogLimiter::default(),
            }),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(
            config.name(),
            config.format_options(),
            config.buffer_size,
            Arc::new(transport),
        ))
    }

    #[must_use]
    pub fn with_rate_estimator(mut self, rate_estimator: Arc<dyn RateEstimator>) -> Self {
        self.rate_estimator = rate_estimator;
        self
    }

    #[must_use]
    pub fn with_error_log_interval(mut self, interval: Duration) -> Self {
        self.state.get_mut().error_log = ErrorLogLimiter::new(interval);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    /// Converts `sample` into data points and appends them to the batch. A full batch is
    /// shipped before the next point goes in.
    pub async fn write(&self, sample: &Sample) -> WriteReport {
        let mut report = WriteReport::default();

        for (index, point) in assemble(sample, &self.options, Some(self.rate_estimator.as_ref())) {
            let point = match point {
                Ok(point) => point,
                Err(e) => {
                    report.outcomes.push((index, Err(e)));
                    continue;
                }
            };

            let mut state = self.state.lock().await;
            if state.buffer.is_full() {
                report.flushes.push(self.flush_locked(&mut state).await);
            }
            state.buffer.push(point);
            report.outcomes.push((index, Ok(())));
        }

        report
    }

    /// Ships whatever is buffered, even an empty batch. The buffer is emptied whatever the
    /// outcome.
    pub async fn flush(&self) -> FlushReport {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut State) -> FlushReport {
        let points = state.buffer.len();
        debug!(destination = %self.name, "flushing {points} data points");

        let result = match state.buffer.serialize() {
            Ok(payload) => match self.transport.send(payload).await {
                Ok(None) => Ok(()),
                Ok(Some(StatusCode::NO_CONTENT)) => Ok(()),
                Ok(Some(status)) => Err(ShippingError::Destination(status)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            if let Some(failures) = state.error_log.record_failure(Instant::now()) {
                error!(destination = %self.name, "{e}");
                error!(destination = %self.name, "{failures} HTTP POST errors since last log");
            }
        }

        state.buffer.clear();
        FlushReport { points, result }
    }

    /// Final flush before the destination goes away.
    pub async fn shutdown(&self) -> FlushReport {
        let report = self.flush().await;
        debug!(destination = %self.name, "shut down");
        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sample::SampleValue;
    use std::sync::Mutex as StdMutex;
    use tracing_test::traced_test;

    /// Records every payload and answers with a fixed status.
    pub(crate) struct RecordingTransport {
        pub(crate) payloads: StdMutex<Vec<Vec<u8>>>,
        pub(crate) response: Result<Option<StatusCode>, String>,
    }

    impl RecordingTransport {
        pub(crate) fn with_status(status: Option<StatusCode>) -> Arc<Self> {
            Arc::new(Self {
                payloads: StdMutex::new(Vec::new()),
                response: Ok(status),
            })
        }

        pub(crate) fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                payloads: StdMutex::new(Vec::new()),
                response: Err(message.to_string()),
            })
        }

        #[allow(clippy::unwrap_used)]
        pub(crate) fn bodies(&self) -> Vec<serde_json::Value> {
            self.payloads
                .lock()
                .unwrap()
                .iter()
                .map(|p| serde_json::from_slice(p).unwrap())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        #[allow(clippy::unwrap_used)]
        async fn send(&self, payload: Vec<u8>) -> Result<Option<StatusCode>, ShippingError> {
            self.payloads.lock().unwrap().push(payload);
            self.response.clone().map_err(ShippingError::Transport)
        }
    }

    fn destination(buffer_size: usize, transport: Arc<RecordingTransport>) -> Destination {
        Destination::new(
            "write_opentsdb/test".to_string(),
            FormatOptions::default(),
            buffer_size,
            transport,
        )
    }

    fn gauge_sample(plugin: &str, value: f64) -> Sample {
        Sample {
            host: "node1".to_string(),
            plugin: plugin.to_string(),
            type_name: "gauge".to_string(),
            time: 1_700_000_000.0,
            values: vec![SampleValue::gauge("value", value)],
            ..Default::default()
        }
    }

    #[test]
    fn test_error_log_limiter() {
        let mut limiter = ErrorLogLimiter::new(Duration::from_secs(30));
        let start = Instant::now();

        assert_eq!(limiter.record_failure(start), Some(1));
        assert_eq!(limiter.record_failure(start + Duration::from_secs(10)), None);
        assert_eq!(limiter.record_failure(start + Duration::from_secs(30)), None);
        assert_eq!(
            limiter.record_failure(start + Duration::from_secs(31)),
            Some(3)
        );
        assert_eq!(limiter.record_failure(start + Duration::from_secs(32)), None);
    }

    #[tokio::test]
    async fn test_flush_triggered_before_overflow() {
        let transport = RecordingTransport::with_status(Some(StatusCode::NO_CONTENT));
        let destination = destination(3, transport.clone());

        for i in 0..3 {
            let report = destination.write(&gauge_sample("p", f64::from(i))).await;
            assert!(report.flushes.is_empty());
        }
        assert_eq!(destination.buffered().await, 3);
        assert!(transport.bodies().is_empty());

        let report = destination.write(&gauge_sample("p", 3.0)).await;
        assert_eq!(report.flushes.len(), 1);
        assert_eq!(report.flushes[0].points, 3);
        assert!(report.is_ok());

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].as_array().map(Vec::len), Some(3));
        assert_eq!(destination.buffered().await, 1);
    }

    #[tokio::test]
    async fn test_second_flush_sends_empty_batch() {
        let transport = RecordingTransport::with_status(Some(StatusCode::NO_CONTENT));
        let destination = destination(30, transport.clone());

        destination.write(&gauge_sample("cpu", 99.5)).await;
        assert!(destination.flush().await.is_ok());
        let report = destination.flush().await;
        assert!(report.is_ok());
        assert_eq!(report.points, 0);

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(
            bodies[0],
            serde_json::json!([{
                "timestamp": 1_700_000_000.0,
                "metric": "cpu.gauge",
                "value": "99.5",
                "tags": {"fqdn": "node1"}
            }])
        );
        assert_eq!(bodies[1], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_missing_status_is_success() {
        let transport = RecordingTransport::with_status(None);
        let destination = destination(30, transport);
        assert!(destination.flush().await.is_ok());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unexpected_status_fails_and_clears() {
        let transport = RecordingTransport::with_status(Some(StatusCode::OK));
        let destination = destination(30, transport);

        destination.write(&gauge_sample("cpu", 1.0)).await;
        let report = destination.flush().await;
        assert!(matches!(
            report.result,
            Err(ShippingError::Destination(StatusCode::OK))
        ));
        assert_eq!(destination.buffered().await, 0);
        assert!(logs_contain("HTTP Error code: 200 OK"));
        assert!(logs_contain("1 HTTP POST errors since last log"));
        assert!(logs_contain("destination=write_opentsdb/test"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transport_error_is_rate_limited() {
        let transport = RecordingTransport::failing("connection refused");
        let destination = destination(30, transport.clone());

        for _ in 0..3 {
            destination.write(&gauge_sample("cpu", 1.0)).await;
            let report = destination.flush().await;
            assert!(matches!(report.result, Err(ShippingError::Transport(_))));
        }
        assert_eq!(transport.bodies().len(), 3);
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("HTTP POST errors since last log"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one error burst, got {n}")),
            }
        });
    }

    #[tokio::test]
    async fn test_failed_points_are_reported() {
        let transport = RecordingTransport::with_status(Some(StatusCode::NO_CONTENT));
        let destination = destination(30, transport);

        let mut sample = gauge_sample("cpu", 1.0);
        sample.values.push(SampleValue {
            name: "broken".to_string(),
            kind: crate::sample::DsKind::Counter,
            value: crate::sample::Value::Gauge(1.0),
        });

        let report = destination.write(&sample).await;
        assert_eq!(report.written(), 1);
        assert_eq!(report.failures().map(|(i, _)| i).collect::<Vec<_>>(), vec![1]);
        assert!(!report.is_ok());
        assert_eq!(destination.buffered().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let transport = RecordingTransport::with_status(Some(StatusCode::NO_CONTENT));
        let destination = destination(30, transport.clone());

        destination.write(&gauge_sample("cpu", 1.0)).await;
        let report = destination.shutdown().await;
        assert_eq!(report.points, 1);
        assert_eq!(transport.bodies().len(), 1);
    }

    #[allow(clippy::unwrap_used)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_overfill_a_batch() {
        const PRODUCERS: u32 = 16;
        const WRITES: u32 = 50;
        const BUFFER_SIZE: usize = 7;

        let transport = RecordingTransport::with_status(Some(StatusCode::NO_CONTENT));
        let destination = Arc::new(destination(BUFFER_SIZE, transport.clone()));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let destination = Arc::clone(&destination);
                tokio::spawn(async move {
                    for i in 0..WRITES {
                        let value = f64::from(producer * 1000 + i);
                        let report = destination.write(&gauge_sample("p", value)).await;
                        assert!(report.is_ok());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(destination.flush().await.is_ok());

        let bodies = transport.bodies();
        let mut shipped: Vec<String> = Vec::new();
        for body in &bodies {
            let batch = body.as_array().unwrap();
            assert!(batch.len() <= BUFFER_SIZE, "batch of {}", batch.len());
            shipped.extend(
                batch
                    .iter()
                    .map(|point| point["value"].as_str().unwrap().to_string()),
            );
        }
        assert_eq!(shipped.len(), (PRODUCERS * WRITES) as usize);
        shipped.sort();
        shipped.dedup();
        assert_eq!(shipped.len(), (PRODUCERS * WRITES) as usize);
        assert_eq!(destination.buffered().await, 0);
    }

    #[allow(clippy::unwrap_used)]
    #[tokio::test]
    async fn test_largest_buffer_size_registers() {
        let config = NodeConfig::from_item(&crate::config::ConfigItem::block(
            "Node",
            vec![crate::config::ConfigItem::number("BufferSize", 2_147_483_647.0)],
        ))
        .unwrap();
        let destination = Destination::from_config(&config).unwrap();

        let report = destination.write(&gauge_sample("cpu", 1.0)).await;
        assert!(report.flushes.is_empty());
        assert_eq!(destination.buffered().await, 1);
    }
}
