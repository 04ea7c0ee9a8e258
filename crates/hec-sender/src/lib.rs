// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching client for HTTP event collector endpoints.
//!
//! Events handed to [`sender::Sender::send`] are accumulated in a shared buffer and flushed as a
//! single POST once a count or size threshold is crossed, when the heartbeat timer fires, or on an
//! explicit flush. Delivery happens on a background dispatcher so producers never wait on the
//! network.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch_buffer;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod errors;
pub mod event;
pub mod metadata;
pub mod scheduler;
pub mod sender;
pub mod serializer;
pub mod transport;
