// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-plane state and announcements.
//!
//! The proxy reports two independent facts on its control channel: the
//! database link status (`CASSANDRAREADY` / `NOCASSANDRA`) and its own
//! readiness to serve. Database-ready announcements are suppressed until
//! the process itself has become ready, so supervisors never see a
//! "database up" message from a proxy that is still bootstrapping.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Outbound announcement: the database link is down.
pub const MSG_NO_CASSANDRA: &str = "NOCASSANDRA";
/// Outbound announcement: the database link is up.
pub const MSG_CASSANDRA_READY: &str = "CASSANDRAREADY";

/// Database link status as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbStatus {
    Down,
    Ready,
}

/// Shared control-plane state.
///
/// One instance per process, shared by the reconnection machine (which
/// flips the database status), the control server (which answers status
/// queries and forwards announcements to connected peers) and the
/// runtime (which marks process readiness and requests shutdown).
pub struct ControlPlane {
    status_tx: watch::Sender<DbStatus>,
    process_ready: AtomicBool,
    peers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for ControlPlane {
    fn default() -> Self {
        let (status_tx, _) = watch::channel(DbStatus::Down);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            status_tx,
            process_ready: AtomicBool::new(false),
            peers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }
}

impl ControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current database link status.
    pub fn db_status(&self) -> DbStatus {
        *self.status_tx.borrow()
    }

    /// Watch database link status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<DbStatus> {
        self.status_tx.subscribe()
    }

    /// Mark the process ready to serve. Called once schema
    /// initialization completes.
    pub fn mark_process_ready(&self) {
        if !self.process_ready.swap(true, Ordering::SeqCst) {
            info!("process ready to serve");
        }
    }

    pub fn process_ready(&self) -> bool {
        self.process_ready.load(Ordering::SeqCst)
    }

    /// Flip the database status to down and announce it.
    ///
    /// Called once per disconnection episode by the reconnection
    /// machine; the episode structure (not this method) guarantees the
    /// once-per-episode property.
    pub fn announce_no_database(&self) {
        let _ = self.status_tx.send(DbStatus::Down);
        self.broadcast(MSG_NO_CASSANDRA);
    }

    /// Flip the database status to ready.
    ///
    /// The `CASSANDRAREADY` announcement goes out only if the process
    /// has previously declared itself ready to accept work.
    pub fn announce_database_ready(&self) {
        let _ = self.status_tx.send(DbStatus::Ready);
        if self.process_ready() {
            self.broadcast(MSG_CASSANDRA_READY);
        }
    }

    /// Send a line to every connected control peer.
    pub fn broadcast(&self, line: &str) {
        debug!(message = line, "control-plane broadcast");
        self.peers
            .lock()
            .unwrap()
            .retain(|peer| peer.send(line.to_string()).is_ok());
    }

    /// Register a control peer; announcements arrive on the receiver.
    pub fn register_peer(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().push(tx);
        rx
    }

    /// Request process shutdown (control-plane `STOP`).
    pub fn request_shutdown(&self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Watch for the shutdown request.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let control = ControlPlane::new();
        assert_eq!(control.db_status(), DbStatus::Down);
        assert!(!control.process_ready());
        assert!(!control.shutdown_requested());
    }

    #[test]
    fn test_database_ready_announcement_gated_on_process_readiness() {
        let control = ControlPlane::new();
        let mut peer = control.register_peer();

        // Not process-ready yet: status flips but nothing is broadcast.
        control.announce_database_ready();
        assert_eq!(control.db_status(), DbStatus::Ready);
        assert!(peer.try_recv().is_err());

        control.mark_process_ready();
        control.announce_database_ready();
        assert_eq!(peer.try_recv().unwrap(), MSG_CASSANDRA_READY);
    }

    #[test]
    fn test_no_database_always_announced() {
        let control = ControlPlane::new();
        let mut peer = control.register_peer();
        control.announce_no_database();
        assert_eq!(control.db_status(), DbStatus::Down);
        assert_eq!(peer.try_recv().unwrap(), MSG_NO_CASSANDRA);
    }

    #[test]
    fn test_broadcast_drops_disconnected_peers() {
        let control = ControlPlane::new();
        let peer = control.register_peer();
        drop(peer);
        // Dropped peer is pruned on the next broadcast.
        control.broadcast("X");
        let mut live = control.register_peer();
        control.broadcast("Y");
        assert_eq!(live.try_recv().unwrap(), "Y");
    }

    #[test]
    fn test_shutdown_request_observable() {
        let control = ControlPlane::new();
        let rx = control.subscribe_shutdown();
        control.request_shutdown();
        assert!(*rx.borrow());
        assert!(control.shutdown_requested());
    }
}
