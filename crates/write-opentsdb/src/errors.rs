// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::sample::DsKind;
use reqwest::StatusCode;

/// Reading a metadata entry failed for a reason other than absence.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    #[error("meta data key '{key}' does not hold a string")]
    NotAString { key: String },
}

/// Errors raised while rendering the metric name or the value of one data source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("metric name exceeds {capacity} bytes")]
    Capacity { capacity: usize },
    #[error("data source type {kind} does not match value {value}")]
    KindMismatch { kind: DsKind, value: String },
    #[error("rate for data source {index} is not available")]
    RateUnavailable { index: usize },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Errors raised while deriving the tag set of one data source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TagError {
    #[error("failed to parse json host '{host}'")]
    HostParse { host: String },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Why a single data source of a sample did not produce a data point.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointError {
    #[error("error with format_name: {0}")]
    Name(FormatError),
    #[error("error with format_values: {0}")]
    Value(FormatError),
    #[error("error with format_tags: {0}")]
    Tags(#[from] TagError),
}

/// Batch-level delivery failures. The batch is discarded in every case.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("failed to serialize batch: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("HTTP request failed: {0}")]
    Transport(String),
    #[error("HTTP Error code: {0}")]
    Destination(StatusCode),
}

/// Errors raised while reading a `Node` block or building its HTTP client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration option: {0}.")]
    UnknownOption(String),
    #[error("Invalid value for option {option}: {reason}")]
    InvalidValue { option: String, reason: String },
    #[error("Invalid SSLVersion option: {0}.")]
    SslVersion(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
}
