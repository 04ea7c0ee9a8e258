// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use hec_sender::config::SenderConfig;
use hec_sender::delivery::DeliveryReport;
use hec_sender::metadata::Metadata;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};

pub const EVENT_PATH: &str = "/services/collector/event/1.0";

/// Returns a base URL nothing is listening on
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let addr = listener.local_addr().expect("failed to read address");
    drop(listener);
    format!("http://{addr}")
}

pub fn sender_config(
    url: &str,
    max_count: usize,
    retry_limit: u32,
    send_mode: &str,
    metadata: Metadata,
) -> SenderConfig {
    SenderConfig::new(url, "mock-token", 0, max_count, 0, retry_limit, send_mode, metadata)
        .expect("failed to create config")
}

/// Collects every report already produced
pub async fn drain_reports(rx: &mut UnboundedReceiver<DeliveryReport>) -> Vec<DeliveryReport> {
    let mut reports = Vec::new();
    while let Ok(Some(report)) = timeout(Duration::from_millis(50), rx.recv()).await {
        reports.push(report);
    }
    reports
}
