// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use write_opentsdb::{
    config::{ConfigItem, ConfigValue, PluginConfig},
    sample::Sample,
    writer::Writer,
};

const DEFAULT_FLUSH_INTERVAL: u64 = 10;

/// `Node` option names fed from the environment.
const NODE_OPTIONS: [(&str, &str); 7] = [
    ("OPENTSDB_URL", "URL"),
    ("OPENTSDB_TIMEOUT", "Timeout"),
    ("OPENTSDB_BUFFER_SIZE", "BufferSize"),
    ("OPENTSDB_JSON_HOST_TAG", "JsonHostTag"),
    ("OPENTSDB_AUTO_FQDN_FALLBACK", "AutoFqdnFallback"),
    ("OPENTSDB_STORE_RATES", "StoreRates"),
    ("OPENTSDB_ALWAYS_APPEND_DS", "AlwaysAppendDS"),
];

fn config_value(key: &str, raw: String) -> ConfigValue {
    match key {
        "Timeout" | "BufferSize" => raw
            .parse::<f64>()
            .map(ConfigValue::Number)
            .unwrap_or(ConfigValue::String(raw)),
        _ => ConfigValue::String(raw),
    }
}

fn node_from_env() -> ConfigItem {
    let children = NODE_OPTIONS
        .iter()
        .filter_map(|(var, key)| {
            env::var(var)
                .ok()
                .map(|raw| ConfigItem::new(key, vec![config_value(key, raw)]))
        })
        .collect();
    ConfigItem::block("Node", children)
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("OPENTSDB_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let flush_interval = env::var("OPENTSDB_FLUSH_INTERVAL")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_FLUSH_INTERVAL);

    let config = PluginConfig::from_items(&[node_from_env()]);
    let (writer, errors) = Writer::from_config(&config);
    if writer.is_empty() {
        error!(
            "No OpenTSDB node could be registered ({} configuration errors). Shutting down.",
            errors.len()
        );
        return;
    }

    let cancel = CancellationToken::new();
    let flush_loop = writer.spawn_flush_loop(Duration::from_secs(flush_interval), cancel.clone());
    info!("forwarding samples from stdin, flushing every {flush_interval}s");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Sample>(&line) {
                    Ok(sample) => {
                        writer.write(&sample).await;
                    }
                    Err(e) => warn!("Skipping malformed sample: {e}"),
                },
                Ok(None) => {
                    debug!("end of input");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = flush_loop.await {
        error!("flush loop failed: {e}");
    }

    let failed = writer
        .shutdown()
        .await
        .iter()
        .filter(|report| !report.is_ok())
        .count();
    if failed > 0 {
        warn!("{failed} destinations failed their final flush");
    }
    info!("shut down");
}
