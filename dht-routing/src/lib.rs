// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The Kademlia routing table: per-peer metadata and the k-bucket structure that indexes
//! it by XOR distance to a fixed local node id.

pub mod metadata;
pub mod table;

pub use metadata::{MetadataError, NodeKind, PeerMetadata};
pub use table::{InsertOutcome, PeerRecord, RoutingTable, DEFAULT_K};
