//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections across every listener of a run
//! - Let shutdown wait until the count returns to zero
//! - Carry per-connection facts (peer, TLS, deadline switch) into requests
//! - Track request activity so idle keep-alive connections can be closed

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks live connections for graceful shutdown.
///
/// The count lives in a watch channel so waiters wake on the transition to
/// zero instead of polling.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new live connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|n| *n += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    /// Get current live connection count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every tracked connection has closed.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the live count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// In-flight request count of one connection, and when it last changed.
#[derive(Debug, Clone, Copy)]
struct Activity {
    in_flight: usize,
    since: Instant,
}

/// Request activity on one connection.
///
/// A request counts as in flight from the moment its head is parsed until
/// its response body has been handed to the socket.
#[derive(Debug, Clone)]
pub struct ConnectionActivity {
    state: Arc<watch::Sender<Activity>>,
}

impl ConnectionActivity {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Activity {
            in_flight: 0,
            since: Instant::now(),
        });
        Self { state: Arc::new(tx) }
    }

    /// Mark a request as started. It ends when the guard drops.
    pub fn begin(&self) -> ActivityGuard {
        self.state.send_modify(|a| {
            a.in_flight += 1;
            a.since = Instant::now();
        });
        ActivityGuard {
            state: Arc::clone(&self.state),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.borrow().in_flight
    }

    /// Resolve once no request has been in flight for `limit`.
    pub async fn idle_for(&self, limit: Duration) {
        let mut rx = self.state.subscribe();
        loop {
            let activity = *rx.borrow_and_update();
            if activity.in_flight > 0 {
                // The sender lives in self, so the channel cannot close while we wait.
                let _ = rx.changed().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(activity.since + limit) => return,
                _ = rx.changed() => {}
            }
        }
    }
}

impl Default for ConnectionActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Ends one request's activity when dropped.
#[derive(Debug)]
pub struct ActivityGuard {
    state: Arc<watch::Sender<Activity>>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.state.send_modify(|a| {
            a.in_flight = a.in_flight.saturating_sub(1);
            a.since = Instant::now();
        });
    }
}

/// Per-connection facts made visible to every request on that connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub tls: bool,
    /// Switch shared with the socket's deadline wrapper.
    pub deadlines: DeadlineSwitch,
}

/// Turns socket read/write deadlines off once a connection leaves HTTP.
#[derive(Debug, Clone, Default)]
pub struct DeadlineSwitch(Arc<AtomicBool>);

impl DeadlineSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop enforcing deadlines for the rest of the connection.
    pub fn disable(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_disabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_wakes_when_last_guard_drops() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[test]
    fn deadline_switch_is_shared() {
        let switch = DeadlineSwitch::new();
        let copy = switch.clone();
        copy.disable();
        assert!(switch.is_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_waits_for_requests_to_finish() {
        let activity = ConnectionActivity::new();
        let guard = activity.begin();
        assert_eq!(activity.in_flight(), 1);

        let started = Instant::now();
        tokio::join!(activity.idle_for(Duration::from_secs(1)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(guard);
        });

        assert_eq!(activity.in_flight(), 0);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_restarts_the_idle_clock() {
        let activity = ConnectionActivity::new();

        let started = Instant::now();
        tokio::join!(activity.idle_for(Duration::from_secs(1)), async {
            tokio::time::sleep(Duration::from_millis(800)).await;
            drop(activity.begin());
        });

        assert!(started.elapsed() >= Duration::from_millis(1800));
    }
}
