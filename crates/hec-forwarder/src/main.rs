// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use hec_sender::{config::SenderConfig, sender::Sender};

const DEFAULT_SEVERITY: &str = "INFO";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("HEC_LOG_LEVEL")
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
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match SenderConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating event sender config: {e}");
            return;
        }
    };
    let severity = env::var("HEC_SEVERITY").unwrap_or_else(|_| DEFAULT_SEVERITY.to_string());

    info!(
        "Forwarding stdin to {} ({} mode)",
        config.endpoint, config.send_mode
    );
    let sender = match Sender::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Error starting event sender: {e}");
            return;
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded: u64 = 0;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = sender.send(&severity, &line) {
                        warn!("Dropping line: {e}");
                        break;
                    }
                    forwarded += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, flushing pending events");
                break;
            }
        }
    }

    sender.close().await;
    info!("Forwarded {forwarded} events");
}
