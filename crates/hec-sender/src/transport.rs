// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of serialized batches.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::{SendMode, SenderConfig, TlsPolicy};
use crate::constants::{AUTHORIZATION_SCHEME, CONTENT_TYPE as EVENT_CONTENT_TYPE};
use crate::errors::{Creation, TransportError};

/// Response to a single POST that reached the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResponse {
    pub status: StatusCode,
    pub body: String,
}

impl PostResponse {
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Performs one POST of a batch payload.
///
/// `Err` means the request never produced a response (connection refused, timeout, TLS failure)
/// and is the only outcome that gets retried.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn post(&self, payload: Bytes) -> Result<PostResponse, TransportError>;
}

/// Delivers batches to the collector endpoint with `reqwest`.
///
/// The client, and with it the connection pool, is built on the first delivery and reused until
/// the deliverer is dropped.
pub struct HttpDeliverer {
    endpoint: Url,
    headers: HeaderMap,
    send_mode: SendMode,
    tls: TlsPolicy,
    timeout: Duration,
    https_proxy: Option<String>,
    client: OnceCell<reqwest::Client>,
}

impl HttpDeliverer {
    pub fn new(config: &SenderConfig) -> Result<Self, Creation> {
        Ok(HttpDeliverer {
            endpoint: config.endpoint.clone(),
            headers: request_headers(&config.token)?,
            send_mode: config.send_mode,
            tls: config.tls,
            timeout: config.timeout,
            https_proxy: config.https_proxy.clone(),
            client: OnceCell::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    async fn client(&self) -> Result<&reqwest::Client, TransportError> {
        self.client
            .get_or_try_init(|| async {
                debug!(
                    "Starting HTTP client for {} in {} mode",
                    self.endpoint, self.send_mode
                );
                build_client(
                    self.send_mode,
                    self.tls,
                    self.timeout,
                    self.https_proxy.as_deref(),
                )
            })
            .await
    }
}

#[async_trait]
impl Deliver for HttpDeliverer {
    async fn post(&self, payload: Bytes) -> Result<PostResponse, TransportError> {
        let client = self.client().await?;
        let response = client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .body(payload)
            .send()
            .await?;
        let status = response.status();
        // Read to the end even on success, otherwise the connection is not returned to the pool
        let text = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable response body: {e}>"));
        let body = if status == StatusCode::OK {
            String::new()
        } else {
            text
        };
        Ok(PostResponse { status, body })
    }
}

fn request_headers(token: &str) -> Result<HeaderMap, Creation> {
    let mut headers = HeaderMap::new();
    let mut authorization = HeaderValue::from_str(&format!("{AUTHORIZATION_SCHEME} {token}"))
        .map_err(|_| Creation::InvalidToken)?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_CONTENT_TYPE));
    Ok(headers)
}

/// Builds the delivery client. Sequential mode keeps a single pooled connection; parallel mode
/// leaves reqwest's pool at its default size.
pub fn build_client(
    send_mode: SendMode,
    tls: TlsPolicy,
    timeout: Duration,
    https_proxy: Option<&str>,
) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if send_mode == SendMode::Sequential {
        builder = builder.pool_max_idle_per_host(1);
    }
    if tls == TlsPolicy::AcceptInvalid {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    if let Some(proxy) = https_proxy {
        let proxy = reqwest::Proxy::https(proxy).map_err(|e| TransportError::Client(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| TransportError::Client(e.to_string()))
}
