// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::batch_buffer::BatchLimits;
use crate::constants::{
    COLLECTOR_EVENT_PATH, DEFAULT_PARALLEL_CONNECTIONS, DEFAULT_REQUEST_TIMEOUT_SECS,
    SEND_MODE_PARALLEL, SEND_MODE_SEQUENTIAL,
};
use crate::errors::Creation;
use crate::metadata::Metadata;

/// Cross-batch delivery policy.
///
/// `Sequential` allows a single delivery in flight, so batches are indexed in the order they were
/// flushed. `Parallel` lets several deliveries overlap and gives up that ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SendMode {
    #[default]
    Sequential,
    Parallel,
}

impl SendMode {
    /// Maximum number of deliveries in flight
    pub fn max_in_flight(&self) -> usize {
        match self {
            SendMode::Sequential => 1,
            SendMode::Parallel => DEFAULT_PARALLEL_CONNECTIONS,
        }
    }
}

impl FromStr for SendMode {
    type Err = Creation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SEND_MODE_SEQUENTIAL => Ok(SendMode::Sequential),
            SEND_MODE_PARALLEL => Ok(SendMode::Parallel),
            other => Err(Creation::UnknownSendMode(other.to_string())),
        }
    }
}

impl fmt::Display for SendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendMode::Sequential => write!(f, "{SEND_MODE_SEQUENTIAL}"),
            SendMode::Parallel => write!(f, "{SEND_MODE_PARALLEL}"),
        }
    }
}

/// How a failed delivery is retried. The number is the count of retries after the first
/// attempt, so a batch is attempted at most `retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Resend right away
    Immediate(u32),
    /// Wait `delay_ms * retry` before each retry
    LinearBackoff(u32, u64),
}

impl RetryStrategy {
    pub fn retry_limit(&self) -> u32 {
        match self {
            RetryStrategy::Immediate(retries) | RetryStrategy::LinearBackoff(retries, _) => *retries,
        }
    }

    /// Delay before the given retry (1-based)
    pub fn delay_before(&self, retry: u32) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Duration::from_millis(delay_ms.saturating_mul(u64::from(retry)))
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Immediate(0)
    }
}

/// Certificate handling for the delivery client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    #[default]
    Verify,
    /// Accept any certificate and any hostname. Development use only.
    AcceptInvalid,
}

/// Immutable sender settings
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub endpoint: Url,
    pub token: String,
    /// Heartbeat flush period, `None` disables the timer
    pub flush_interval: Option<Duration>,
    pub limits: BatchLimits,
    pub retry_strategy: RetryStrategy,
    pub send_mode: SendMode,
    pub metadata: Metadata,
    pub tls: TlsPolicy,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
}

impl SenderConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: &str,
        token: &str,
        flush_interval_ms: u64,
        max_batch_count: usize,
        max_batch_size: usize,
        retry_limit: u32,
        send_mode: &str,
        metadata: Metadata,
    ) -> Result<SenderConfig, Creation> {
        if token.is_empty() {
            return Err(Creation::MissingSetting("token"));
        }
        Ok(SenderConfig {
            endpoint: collector_endpoint(base_url)?,
            token: token.to_string(),
            flush_interval: (flush_interval_ms > 0).then(|| Duration::from_millis(flush_interval_ms)),
            limits: BatchLimits::new(max_batch_count, max_batch_size),
            retry_strategy: RetryStrategy::Immediate(retry_limit),
            send_mode: send_mode.parse()?,
            metadata,
            tls: TlsPolicy::Verify,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            https_proxy: None,
        })
    }

    /// Reads the sender settings from `HEC_*` environment variables.
    pub fn from_env() -> Result<SenderConfig, Creation> {
        let url = env::var("HEC_URL").map_err(|_| Creation::MissingSetting("HEC_URL"))?;
        let token = env::var("HEC_TOKEN").map_err(|_| Creation::MissingSetting("HEC_TOKEN"))?;
        let send_mode =
            env::var("HEC_SEND_MODE").unwrap_or_else(|_| SEND_MODE_SEQUENTIAL.to_string());
        let retry_limit = env_number("HEC_RETRY_LIMIT").unwrap_or(0);

        let metadata = Metadata::new(
            env::var("HEC_INDEX").ok().as_deref(),
            env::var("HEC_SOURCE").ok().as_deref(),
            env::var("HEC_SOURCETYPE").ok().as_deref(),
        );

        let mut config = SenderConfig::new(
            &url,
            &token,
            env_number("HEC_FLUSH_INTERVAL_MS").unwrap_or(0),
            env_number("HEC_MAX_BATCH_COUNT").unwrap_or(0),
            env_number("HEC_MAX_BATCH_SIZE").unwrap_or(0),
            retry_limit,
            &send_mode,
            metadata,
        )?;

        if let Some(backoff_ms) = env_number::<u64>("HEC_RETRY_BACKOFF_MS").filter(|ms| *ms > 0) {
            config = config.with_retry_strategy(RetryStrategy::LinearBackoff(retry_limit, backoff_ms));
        }
        if let Some(secs) = env_number::<u64>("HEC_TIMEOUT_SECS").filter(|s| *s > 0) {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Ok(proxy) = env::var("HEC_PROXY_HTTPS").or_else(|_| env::var("HTTPS_PROXY")) {
            config = config.with_https_proxy(proxy);
        }
        let insecure = env::var("HEC_INSECURE_TLS")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        if insecure {
            config = config.insecure_tls();
        }
        Ok(config)
    }

    /// Disables certificate and hostname validation. Development use only.
    pub fn insecure_tls(mut self) -> Self {
        self.tls = TlsPolicy::AcceptInvalid;
        self
    }

    pub fn with_retry_strategy(mut self, retry_strategy: RetryStrategy) -> Self {
        self.retry_strategy = retry_strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_https_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.https_proxy = Some(proxy.into());
        self
    }
}

fn collector_endpoint(base_url: &str) -> Result<Url, Creation> {
    let full = format!("{}{COLLECTOR_EVENT_PATH}", base_url.trim_end_matches('/'));
    let url = Url::parse(&full).map_err(|e| Creation::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Creation::InvalidUrl {
            url: base_url.to_string(),
            reason: format!("unsupported scheme {scheme}"),
        }),
    }
}

fn env_number<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}
