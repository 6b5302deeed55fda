// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! The host environment capability (§9 design notes).
//!
//! Browser-specific APIs (Page Visibility) are not part of the core; `tab_visible` is
//! modeled as an input signal from a pluggable [`HostEnvironment`]. A server process wires
//! up [`AlwaysVisible`]; an in-browser node supplies its own implementation backed by the
//! Page Visibility API, outside this crate's scope.

use tokio::sync::watch;

/// A capability that reports whether the local process's "tab" (or, for a server, the
/// process itself) is currently visible/foreground.
pub trait HostEnvironment: Send + Sync {
    /// Whether the host is currently visible.
    fn is_visible(&self) -> bool;

    /// Subscribe to visibility changes. The returned receiver's initial value is the
    /// current visibility; further changes are published as they occur.
    fn watch_visibility(&self) -> watch::Receiver<bool>;
}

/// A [`HostEnvironment`] for server processes, which are always considered visible/active
/// (§9: "Server hosts return `true` permanently").
pub struct AlwaysVisible {
    tx: watch::Sender<bool>,
}

impl Default for AlwaysVisible {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }
}

impl HostEnvironment for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }

    fn watch_visibility(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_visible_reports_true() {
        let host = AlwaysVisible::default();
        assert!(host.is_visible());
        assert!(*host.watch_visibility().borrow());
    }
}
