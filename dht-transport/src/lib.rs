// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! # dht-transport
//!
//! Per-peer connection lifecycle and transport abstraction for the DHT mesh.
//!
//! Every peer edge is owned by exactly one [`manager::TransportManager`], dedicated to
//! that single peer and backed by either a WebSocket connection ([`ws::WebSocketManager`])
//! or a WebRTC data channel ([`rtc::WebRtcManager`]). [`factory::TransportFactory`] decides
//! which transport a given edge uses and builds the manager for it; everything else —
//! request/response correlation, keep-alive, glare resolution, the uniform event stream —
//! lives in [`manager::ManagerCore`] and is shared by both concrete transports.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod event;
pub mod factory;
pub mod host;
pub mod manager;
pub mod negotiation;
pub mod pending;
pub mod rtc;
pub mod signal;
pub mod types;
pub mod ws;

pub use config::{IceServer, TransportConfig};
pub use envelope::{Envelope, FramePayload, WireMetadata, WireNode};
pub use error::{DhtError, Result};
pub use event::{DisconnectReason, RequestId, TransportEvent};
pub use factory::TransportFactory;
pub use host::{AlwaysVisible, HostEnvironment};
pub use manager::{ManagerCore, PingOutcome, TransportManager};
pub use rtc::WebRtcManager;
pub use signal::{NoRelay, SignalRelay};
pub use types::{ConnectionDirection, ConnectionState, TransportKind};
pub use ws::{InboundAccept, WebSocketListener, WebSocketManager};
