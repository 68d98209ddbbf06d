// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconnection state machine for the shared cluster session.
//!
//! `Disconnected -> Connecting -> Connected`, driven by a geometric
//! backoff. The machine is the only writer of the shared session; it
//! publishes sessions through a `watch` channel tagged with a generation
//! counter, and workers that hit a session-fatal error send that
//! generation back as a reconnect trigger. Triggers for an already
//! replaced generation are ignored, so a burst of failing workers costs
//! one reconnection episode and one "no database" announcement.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};

use crate::control::ControlPlane;
use crate::driver::{ClusterDriver, ClusterSession, ConnectOptions};

/// First retry delay after a failed connect.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(1_500);
/// Retry delay ceiling.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Geometric retry delay: doubles on each failure, capped, reset on
/// success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now; the next one doubles up to the ceiling.
    pub fn delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// The delay the next `delay()` call would return.
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// A published cluster session plus the generation that created it.
#[derive(Clone)]
pub struct SharedSession {
    pub generation: u64,
    pub session: Arc<dyn ClusterSession>,
}

/// The reconnection state machine.
pub struct Reconnector {
    driver: Arc<dyn ClusterDriver>,
    opts: ConnectOptions,
    session_tx: watch::Sender<Option<SharedSession>>,
    trigger_rx: mpsc::Receiver<u64>,
    control: Arc<ControlPlane>,
    backoff: Backoff,
    generation: u64,
}

impl Reconnector {
    pub fn new(
        driver: Arc<dyn ClusterDriver>,
        opts: ConnectOptions,
        session_tx: watch::Sender<Option<SharedSession>>,
        trigger_rx: mpsc::Receiver<u64>,
        control: Arc<ControlPlane>,
    ) -> Self {
        Self {
            driver,
            opts,
            session_tx,
            trigger_rx,
            control,
            backoff: Backoff::default(),
            generation: 0,
        }
    }

    /// Run until shutdown. Each loop iteration is one disconnection
    /// episode: announce, retry until connected, then wait for the next
    /// trigger against the live generation.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            // Disconnected: one announcement per episode.
            self.control.announce_no_database();
            let _ = self.session_tx.send(None);

            // Connecting.
            let session = loop {
                if *shutdown.borrow() {
                    return;
                }
                match self.driver.connect(&self.opts).await {
                    Ok(session) => break session,
                    Err(e) => {
                        let delay = self.backoff.delay();
                        warn!(
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "cluster connect failed"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    return;
                                }
                            }
                        }
                    }
                }
            };

            // Connected.
            self.backoff.reset();
            self.generation += 1;
            let generation = self.generation;
            let _ = self.session_tx.send(Some(SharedSession {
                generation,
                session,
            }));
            info!(generation, "cluster session established");
            self.control.announce_database_ready();

            // Wait for a trigger naming the live generation; stale
            // triggers belong to a session already replaced.
            loop {
                tokio::select! {
                    trigger = self.trigger_rx.recv() => match trigger {
                        Some(g) if g >= generation => break,
                        Some(stale) => {
                            warn!(stale, generation, "ignoring stale reconnect trigger");
                        }
                        None => return,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
            warn!(generation, "shared session reported lost, reconnecting");
        }
    }
}
