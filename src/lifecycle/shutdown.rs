//! Shutdown coordination for a server run.

use tokio::sync::watch;

/// Lifecycle state shared between the accept loops and every connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting and serving.
    Running,
    /// No new connections; in-flight requests finish, idle connections close.
    Draining,
    /// Every connection is dropped immediately.
    Closed,
}

/// Coordinator for graceful shutdown and immediate close.
///
/// Provides a watch channel that all long-running tasks observe. States only
/// move forward: `Running → Draining → Closed`.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<ServerState>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Running);
        Self { tx }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        *self.tx.borrow()
    }

    /// Stop accepting and let in-flight work finish.
    pub fn drain(&self) {
        self.advance(ServerState::Draining);
    }

    /// Drop everything now.
    pub fn close(&self) {
        self.advance(ServerState::Closed);
    }

    fn advance(&self, next: ServerState) {
        self.tx.send_if_modified(|state| {
            let forward = matches!(
                (*state, next),
                (ServerState::Running, ServerState::Draining)
                    | (ServerState::Running, ServerState::Closed)
                    | (ServerState::Draining, ServerState::Closed)
            );
            if forward {
                *state = next;
            }
            forward
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once the observed state is no longer `Running`.
pub async fn stopped(rx: &mut watch::Receiver<ServerState>) -> ServerState {
    match rx.wait_for(|state| *state != ServerState::Running).await {
        Ok(state) => *state,
        // Coordinator dropped: treat as an immediate close.
        Err(_) => ServerState::Closed,
    }
}

/// Resolve once the observed state is `Closed`.
pub async fn closed(rx: &mut watch::Receiver<ServerState>) {
    let _ = rx.wait_for(|state| *state == ServerState::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.state(), ServerState::Running);

        shutdown.close();
        shutdown.drain();
        assert_eq!(shutdown.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn subscribers_observe_drain() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        let waiter = tokio::spawn(async move { stopped(&mut rx).await });
        shutdown.drain();

        assert_eq!(waiter.await.unwrap(), ServerState::Draining);
    }
}
