// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Path appended to the configured base URL.
pub const COLLECTOR_EVENT_PATH: &str = "/services/collector/event/1.0";

pub const AUTHORIZATION_SCHEME: &str = "Splunk";

pub const CONTENT_TYPE: &str = "application/json; profile=urn:splunk:event:1.0; charset=utf-8";

pub const METADATA_TIME: &str = "time";
pub const METADATA_INDEX: &str = "index";
pub const METADATA_SOURCE: &str = "source";
pub const METADATA_SOURCETYPE: &str = "sourcetype";

pub const SEND_MODE_SEQUENTIAL: &str = "sequential";
pub const SEND_MODE_PARALLEL: &str = "parallel";

/// Deliveries allowed in flight at once in parallel mode.
pub const DEFAULT_PARALLEL_CONNECTIONS: usize = 10;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Batches waiting for a delivery slot before a warning is logged.
pub const QUEUE_DEPTH_WARNING: usize = 100;
