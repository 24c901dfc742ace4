// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the registered destinations: registration from configuration, sample
//! dispatch, flush signals and teardown.

use crate::config::PluginConfig;
use crate::destination::{Destination, FlushReport, WriteReport};
use crate::errors::ConfigError;
use crate::sample::Sample;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Clone, Default)]
pub struct Writer {
    destinations: Vec<Arc<Destination>>,
}

impl Writer {
    pub fn new(destinations: Vec<Destination>) -> Self {
        Self {
            destinations: destinations.into_iter().map(Arc::new).collect(),
        }
    }

    /// Registers one destination per valid `Node`. Nodes whose configuration or HTTP client
    /// setup fails are skipped; their errors are returned alongside the writer.
    pub fn from_config(config: &PluginConfig) -> (Self, Vec<ConfigError>) {
        let mut errors = config.errors.clone();
        let mut destinations = Vec::with_capacity(config.nodes.len());

        for node in &config.nodes {
            match Destination::from_config(node) {
                Ok(destination) => {
                    info!(destination = %destination.name(), "registered");
                    destinations.push(destination);
                }
                Err(e) => {
                    error!(destination = %node.name(), "{e}");
                    errors.push(e);
                }
            }
        }

        (Self::new(destinations), errors)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter().map(AsRef::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Hands `sample` to every destination, returning one report per destination.
    pub async fn write(&self, sample: &Sample) -> Vec<WriteReport> {
        let mut reports = Vec::with_capacity(self.destinations.len());
        for destination in &self.destinations {
            reports.push(destination.write(sample).await);
        }
        reports
    }

    /// Flush signal from the host runtime. Every destination ships its whole buffer; neither
    /// the age threshold nor the identifier narrow it down.
    pub async fn flush(
        &self,
        _timeout: Option<Duration>,
        _identifier: Option<&str>,
    ) -> Vec<FlushReport> {
        let mut reports = Vec::with_capacity(self.destinations.len());
        for destination in &self.destinations {
            reports.push(destination.flush().await);
        }
        reports
    }

    /// Flushes every destination each `period` until `cancel` fires.
    pub fn spawn_flush_loop(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let writer = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("flush loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        debug!("periodic flush");
                        writer.flush(None, None).await;
                    }
                }
            }
        })
    }

    /// Final flush of every destination. Callers stop submitting samples before calling this.
    pub async fn shutdown(self) -> Vec<FlushReport> {
        let mut reports = Vec::with_capacity(self.destinations.len());
        for destination in self.destinations {
            reports.push(destination.shutdown().await);
        }
        reports
    }
}
