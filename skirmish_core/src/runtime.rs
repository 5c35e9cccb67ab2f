//! Async driver for a [`MatchPeer`].
//!
//! The runtime owns the IO: it drains the transport into the peer's inbox,
//! ticks the peer on the context's clock and flushes the outbox. The same
//! code runs under Tokio in production and under virtual time in the
//! simulation harness.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use skirmish_env::{EnvError, MatchContext, PeerId, PeerTransport};

use crate::error::SessionError;
use crate::peer::{ConnectionStatus, MatchPeer, Outgoing};
use crate::protocol::encode;

/// Connection attempts before a join gives up.
pub const HANDSHAKE_ATTEMPTS: u32 = 2;

pub struct PeerRuntime<Ctx: MatchContext, Net: PeerTransport> {
    context: Arc<Ctx>,
    network: Arc<Net>,
    peer: MatchPeer,
}

impl<Ctx: MatchContext, Net: PeerTransport> PeerRuntime<Ctx, Net> {
    pub fn new(context: Arc<Ctx>, network: Arc<Net>, peer: MatchPeer) -> Self {
        Self {
            context,
            network,
            peer,
        }
    }

    pub fn peer(&self) -> &MatchPeer {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut MatchPeer {
        &mut self.peer
    }

    /// One iteration: receive, tick, send. Returns the number of messages sent.
    pub async fn step(&mut self) -> usize {
        while let Some((from, event)) = self.network.try_recv() {
            self.peer.enqueue(from, event);
        }
        self.peer.tick(self.context.now());
        self.flush().await
    }

    async fn flush(&mut self) -> usize {
        let mut sent = 0;
        for outgoing in self.peer.take_outbox() {
            let message = match &outgoing {
                Outgoing::To(_, message) | Outgoing::Broadcast(message) => message,
            };
            let packet = match encode(message, self.context.unix_millis()) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(peer = %self.peer.local_id(), error = %e, "failed to encode message");
                    continue;
                }
            };
            match outgoing {
                Outgoing::To(target, _) => match self.network.send(&target, packet).await {
                    Ok(()) => sent += 1,
                    // Liveness is judged by heartbeats, not send failures
                    Err(e) => debug!(peer = %self.peer.local_id(), target = %target, error = %e, "send failed"),
                },
                Outgoing::Broadcast(_) => {
                    sent += self.network.broadcast(packet).await;
                }
            }
        }
        sent
    }

    /// Ticks at the configured rate until `shutdown` flips to true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.peer.config().tick_interval();
        info!(peer = %self.peer.local_id(), ?interval, "peer runtime started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.step().await;
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.context.sleep(interval) => {}
            }
        }
        info!(peer = %self.peer.local_id(), "peer runtime stopped");
    }

    /// Connects to the match host, marking the peer failed if it never answers.
    pub async fn connect_to_host(&mut self, host: &PeerId) -> Result<(), SessionError> {
        self.peer.set_status(ConnectionStatus::Connecting);
        let timeout = self.peer.config().handshake_timeout;
        match connect_with_retry(self.context.as_ref(), self.network.as_ref(), host, timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.peer.set_status(ConnectionStatus::Failed { reason: e.to_string() });
                Err(e)
            }
        }
    }
}

/// Connects to `target`, bounding each attempt by `timeout`.
///
/// Only transient failures are retried. A broken transport fails at once.
pub async fn connect_with_retry<Ctx, Net>(
    context: &Ctx,
    network: &Net,
    target: &PeerId,
    timeout: Duration,
) -> Result<(), SessionError>
where
    Ctx: MatchContext,
    Net: PeerTransport,
{
    let mut last_error = EnvError::Timeout(timeout.as_millis() as u64);
    let mut attempts = 0;
    for attempt in 1..=HANDSHAKE_ATTEMPTS {
        attempts = attempt;
        let result = tokio::select! {
            biased;
            result = network.connect(target) => result,
            _ = context.sleep(timeout) => Err(EnvError::Timeout(timeout.as_millis() as u64)),
        };
        match result {
            Ok(()) => {
                debug!(target = %target, attempt, "connected");
                return Ok(());
            }
            Err(e) => {
                warn!(target = %target, attempt, error = %e, "connection attempt failed");
                let transient = e.is_transient();
                last_error = e;
                if !transient {
                    break;
                }
            }
        }
    }
    Err(SessionError::HandshakeFailed {
        host: target.clone(),
        attempts,
        source: last_error,
    })
}
