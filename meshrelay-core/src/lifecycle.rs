//! Lifecycle Controller: the timer family that keeps the outbox, delivery
//! tracker, and relay health probing moving without an explicit caller.
//!
//! Each timer is its own `tokio::time::interval` task, the idiom
//! `HybridTransport::spawn_flush_task` uses rather than one hand-rolled
//! scheduler loop — cancellation is then just dropping (or aborting) the
//! task's `JoinHandle`.

use std::sync::Arc;

use meshrelay_proto::identity::Timestamp;

use crate::config::LifecycleConfig;
use crate::peer::PeerDirectory;
use crate::tracker::{DeliveryTracker, TimeoutOutcome};

/// A probe for the relay's SOCKS-proxied reachability. A real
/// implementation pings the proxy; failures here do not panic the
/// controller, only skip one health cycle.
pub trait RelayHealthProbe: Send + Sync {
    /// Checks whether the relay path is currently reachable.
    fn probe(&self) -> impl std::future::Future<Output = bool> + Send;

    /// Requests the relay transport reset its connection, called after a
    /// failed probe.
    fn request_reset(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// A [`RelayHealthProbe`] that always reports healthy and never resets.
/// Used when no relay transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRelayHealthProbe;

impl RelayHealthProbe for NoRelayHealthProbe {
    async fn probe(&self) -> bool {
        true
    }

    async fn request_reset(&self) {}
}

/// Callbacks the controller invokes on each timer tick. Kept separate from
/// the component structs themselves (rather than the controller holding
/// `Router`/`Outbox` directly) so the controller has no dependency on the
/// transport generic parameters `Router<M, R>` carries.
///
/// The tracker-cleanup timer is not one of these: [`DeliveryTracker::check_timeouts`]
/// and [`DeliveryTracker::gc`] already return their outcomes/counts for
/// logging, so the controller calls them directly instead of routing them
/// through a hook that would just throw those results away.
pub trait LifecycleHooks: Send + Sync {
    /// Runs on the outbox-cleanup timer: purge expired entries.
    fn cleanup_outbox(&self) -> impl std::future::Future<Output = ()> + Send;

    /// Runs on the periodic-flush timer: re-attempt every pending send.
    fn flush_all(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// Owns the background timer families (outbox cleanup, tracker GC, periodic
/// flush, peer pruning, relay health), each its own interval task.
pub struct LifecycleController {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl LifecycleController {
    /// Spawns every timer task. `peers` is pruned on its own schedule
    /// (reusing [`crate::peer::STALE_VISIBILITY_MS`]-derived cadence from
    /// `config`); `tracker` has its timed-out records checked (favorite
    /// direct messages rescheduled under the retry budget, everything else
    /// failed) and is then GC'd; `hooks` drives outbox cleanup and the
    /// periodic flush; `relay_health` probes and requests resets.
    pub fn spawn<H, P>(config: LifecycleConfig, peers: Arc<PeerDirectory>, tracker: Arc<DeliveryTracker>, hooks: Arc<H>, relay_health: Arc<P>) -> Self
    where
        H: LifecycleHooks + 'static,
        P: RelayHealthProbe + 'static,
    {
        let mut handles = Vec::new();

        {
            let hooks = Arc::clone(&hooks);
            let period = config.outbox_cleanup;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    hooks.cleanup_outbox().await;
                }
            }));
        }

        {
            let tracker = Arc::clone(&tracker);
            let period = config.tracker_cleanup;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let now = Timestamp::now();

                    for outcome in tracker.check_timeouts(now).await {
                        match outcome {
                            TimeoutOutcome::Retry { message_id, delay_ms } => {
                                tracing::debug!(%message_id, delay_ms, "delivery timed out, scheduled for retry");
                            }
                            TimeoutOutcome::Failed { message_id, reason } => {
                                tracing::warn!(%message_id, reason = reason.as_str(), "delivery failed");
                            }
                        }
                    }

                    let collected = tracker.gc(now).await;
                    if collected > 0 {
                        tracing::debug!(collected, "delivery tracker garbage collection");
                    }
                }
            }));
        }

        {
            let hooks = Arc::clone(&hooks);
            let period = config.periodic_flush;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    hooks.flush_all().await;
                }
            }));
        }

        {
            let period = config.peer_prune;
            let peers = Arc::clone(&peers);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let events = peers.prune_stale(Timestamp::now()).await;
                    if !events.is_empty() {
                        tracing::debug!(count = events.len(), "stale peer visibility pruned");
                    }
                }
            }));
        }

        {
            let period = config.relay_health;
            let probe = Arc::clone(&relay_health);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                let mut last_healthy = true;
                loop {
                    ticker.tick().await;
                    let healthy = probe.probe().await;
                    if !healthy {
                        tracing::warn!("relay health probe failed");
                        if last_healthy {
                            probe.request_reset().await;
                        }
                    }
                    last_healthy = healthy;
                }
            }));
        }

        Self { handles }
    }

    /// Cancels every timer task. Dropping the controller does the same, but
    /// this makes a graceful shutdown explicit and awaitable-free.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
