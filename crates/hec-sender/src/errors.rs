// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the event sender

/// Raised while building a sender or its configuration
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error("Unknown send mode: {0}")]
    UnknownSendMode(String),

    #[error("Invalid collector URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("Token cannot be used in an Authorization header")]
    InvalidToken,

    #[error("Sender must be created inside a tokio runtime")]
    NoRuntime,
}

/// Returned by `send` when the event cannot be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("sender is closed")]
    Closed,
}

/// Transport-level failure. This is the only class of failure that is retried; an HTTP response
/// with a non-success status is not an error at this layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}
