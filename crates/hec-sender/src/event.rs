// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// A single event waiting to be shipped. The timestamp is taken when the record is created.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    time: f64,
    severity: String,
    message: String,
}

impl EventRecord {
    pub fn new(severity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_time(now_epoch_secs(), severity, message)
    }

    pub fn with_time(time: f64, severity: impl Into<String>, message: impl Into<String>) -> Self {
        EventRecord {
            time,
            severity: severity.into(),
            message: message.into(),
        }
    }

    /// Seconds since the unix epoch, millisecond precision
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn severity(&self) -> &str {
        &self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Contribution of this record to the estimated batch size
    pub fn estimated_size(&self) -> usize {
        self.severity.len() + self.message.len()
    }
}

fn now_epoch_secs() -> f64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    millis as f64 / 1000.0
}
