// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Endpoint used when a `Node` block has no `URL`.
pub const DEFAULT_NODE: &str = "http://localhost:4242";

/// Path appended to the configured base URL.
pub const PUT_PATH: &str = "/api/put";

/// Maximum number of data points held before an implicit flush.
pub const DEFAULT_BUFFER_SIZE: usize = 30;

/// Replacement for characters OpenTSDB does not accept in metric names.
pub const DEFAULT_ESCAPE_CHAR: char = '.';

// Room for ten identifier components of 128 bytes, minus the terminator.
pub const MAX_METRIC_NAME_LEN: usize = 10 * 128 - 1;

/// Batch-level errors are reported at most once per this interval per destination.
pub const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Rate history of a sample identity not seen for this long is dropped.
pub const RATE_CACHE_MAX_AGE: Duration = Duration::from_secs(600);

pub const MAX_REDIRECTS: usize = 50;

pub const USER_AGENT: &str = concat!("write-opentsdb/", env!("CARGO_PKG_VERSION"));

/// Metadata keys driving name and tag derivation.
pub const META_PREFIX: &str = "tsdb_prefix";
pub const META_ID: &str = "tsdb_id";
pub const META_TAG_PLUGIN: &str = "tsdb_tag_plugin";
pub const META_TAG_PLUGIN_INSTANCE: &str = "tsdb_tag_pluginInstance";
pub const META_TAG_TYPE: &str = "tsdb_tag_type";
pub const META_TAG_TYPE_INSTANCE: &str = "tsdb_tag_typeInstance";
pub const META_TAG_DS_NAME: &str = "tsdb_tag_dsname";
pub const META_TAG_ADD_PREFIX: &str = "tsdb_tag_add_";

/// Tag seeded from the sample host when structured host tags are off or unparsable.
pub const FQDN_TAG: &str = "fqdn";
