//! Connectivity monitor
//!
//! Holds the platform's online/offline signal and fans out every edge to
//! subscribers. There is no probing: whatever the platform reports is truth.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub direction: Direction,
    /// Epoch millis
    pub at: i64,
}

struct MonitorState {
    online: bool,
    subscribers: Vec<mpsc::UnboundedSender<Transition>>,
}

pub struct ConnectivityMonitor {
    state: Mutex<MonitorState>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                online: initially_online,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Feed the platform signal. Returns `true` when this was an edge.
    pub fn report(&self, online: bool) -> bool {
        let mut state = self.state.lock();
        if state.online == online {
            return false;
        }
        state.online = online;

        let transition = Transition {
            direction: if online {
                Direction::Online
            } else {
                Direction::Offline
            },
            at: Utc::now().timestamp_millis(),
        };

        // Sent under the lock so every subscriber sees edges in report order
        state.subscribers.retain(|tx| tx.send(transition).is_ok());

        if online {
            info!("Connectivity restored");
        } else {
            warn!("Connectivity lost");
        }
        true
    }

    pub fn set_online(&self) -> bool {
        self.report(true)
    }

    pub fn set_offline(&self) -> bool {
        self.report(false)
    }

    /// Every edge after this call is delivered, none coalesced. Dropping the
    /// subscription unsubscribes.
    pub fn subscribe(&self) -> TransitionSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        TransitionSubscription { rx }
    }

    /// Invoke `callback` once per edge, in order, on a spawned task. Must be
    /// called inside a tokio runtime.
    pub fn on_transition<F>(&self, mut callback: F) -> CallbackSubscription
    where
        F: FnMut(Transition) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let handle = tokio::spawn(async move {
            while let Some(transition) = subscription.recv().await {
                callback(transition);
            }
        });
        CallbackSubscription { handle }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

pub struct TransitionSubscription {
    rx: mpsc::UnboundedReceiver<Transition>,
}

impl TransitionSubscription {
    pub async fn recv(&mut self) -> Option<Transition> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Transition> {
        self.rx.try_recv().ok()
    }
}

/// Handle for a callback registered with [`ConnectivityMonitor::on_transition`].
/// Dropping it stops further callbacks.
pub struct CallbackSubscription {
    handle: JoinHandle<()>,
}

impl CallbackSubscription {
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for CallbackSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_report_only_emits_on_edges() {
        let monitor = ConnectivityMonitor::new(true);
        let mut sub = monitor.subscribe();

        assert!(!monitor.report(true));
        assert!(sub.try_recv().is_none());

        assert!(monitor.set_offline());
        assert!(!monitor.is_online());
        assert_eq!(sub.try_recv().unwrap().direction, Direction::Offline);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_flicker_delivers_every_edge_in_order() {
        let monitor = ConnectivityMonitor::new(true);
        let mut sub = monitor.subscribe();

        monitor.set_offline();
        monitor.set_online();
        monitor.set_offline();
        monitor.set_online();

        let seen: Vec<Direction> = std::iter::from_fn(|| sub.try_recv())
            .map(|t| t.direction)
            .collect();
        assert_eq!(
            seen,
            vec![
                Direction::Offline,
                Direction::Online,
                Direction::Offline,
                Direction::Online
            ]
        );
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let monitor = ConnectivityMonitor::new(false);
        let sub = monitor.subscribe();
        let _kept = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 2);
        drop(sub);
        monitor.set_online();
        assert_eq!(monitor.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_on_transition_callback() {
        let monitor = ConnectivityMonitor::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = monitor.on_transition(move |t| sink.lock().push(t.direction));

        monitor.set_online();
        monitor.set_offline();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![Direction::Online, Direction::Offline]);

        subscription.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.set_online();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().len(), 2);
    }
}
