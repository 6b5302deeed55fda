// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! # dht-bootstrap
//!
//! [`BootstrapClient`] (§4.8): a long-lived, self-reconnecting link to a bootstrap
//! endpoint, used only for (a) authenticated admission, (b) initial peer discovery, (c)
//! invitation relay, and (d) a last-resort WebRTC signaling relay between two browser
//! peers with no direct DHT path. It holds no DHT peer state of its own: losing the
//! bootstrap link never drops an established mesh connection.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod wire;

pub use backoff::{BackoffIter, BackoffPlan};
pub use client::{BootstrapClient, BootstrapEvent, LinkState, PeersOrGenesis};
pub use config::BootstrapConfig;
pub use error::{BootstrapError, Result};
pub use wire::BootstrapFrame;
