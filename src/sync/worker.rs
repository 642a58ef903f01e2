//! Background sync worker
//!
//! Drains the queue on every transition to online, optionally on a fixed
//! interval while online, and on demand.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::coordinator::{DrainOutcome, SyncCoordinator};
use crate::config::EngineConfig;
use crate::connectivity::Direction;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Drain on every transition to online
    pub auto_sync: bool,
    /// Periodic drain while online
    pub interval: Option<Duration>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            interval: None,
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            auto_sync: config.sync.auto_sync,
            interval: config.sync_interval(),
        }
    }
}

#[derive(Debug)]
pub enum SyncCommand {
    /// Trigger a drain now
    SyncNow,
    /// Stop the worker
    Stop,
}

pub struct SyncWorker;

impl SyncWorker {
    /// Start the worker. It runs until `Stop` is sent or every handle is
    /// dropped. Drains run on their own tasks so a trigger that arrives
    /// mid-drain hits the single-flight guard instead of queueing behind it.
    /// Drains in flight when the worker stops are awaited, never aborted.
    pub fn spawn(coordinator: Arc<SyncCoordinator>, settings: WorkerSettings) -> SyncHandle {
        let (tx, mut rx) = mpsc::channel(32);
        let mut transitions = coordinator.monitor().subscribe();
        let mut ticker = settings.interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        let join = tokio::spawn(async move {
            info!(
                "Sync worker started (auto_sync={}, interval={:?})",
                settings.auto_sync, settings.interval
            );

            let mut drains = JoinSet::new();

            loop {
                tokio::select! {
                    Some(transition) = transitions.recv() => {
                        if settings.auto_sync && transition.direction == Direction::Online {
                            trigger(&mut drains, &coordinator, "reconnect");
                        }
                    }

                    _ = next_tick(&mut ticker) => {
                        if coordinator.monitor().is_online() {
                            trigger(&mut drains, &coordinator, "periodic");
                        }
                    }

                    cmd = rx.recv() => {
                        match cmd {
                            Some(SyncCommand::SyncNow) => trigger(&mut drains, &coordinator, "manual"),
                            Some(SyncCommand::Stop) | None => break,
                        }
                    }

                    Some(_) = drains.join_next(), if !drains.is_empty() => {}
                }
            }

            if !drains.is_empty() {
                info!("Waiting for {} in-flight drain(s)", drains.len());
            }
            while let Some(result) = drains.join_next().await {
                if let Err(e) = result {
                    error!("Drain task failed: {}", e);
                }
            }

            info!("Sync worker stopped");
        });

        SyncHandle { tx, join }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn trigger(drains: &mut JoinSet<()>, coordinator: &Arc<SyncCoordinator>, reason: &'static str) {
    let coordinator = coordinator.clone();
    drains.spawn(async move {
        debug!("Sync triggered ({})", reason);
        match coordinator.sync().await {
            Ok(DrainOutcome::Completed(report)) if report.attempted > 0 => {
                debug!(
                    "{} drain: {}/{} synced",
                    reason, report.succeeded, report.attempted
                );
            }
            Ok(_) => {}
            Err(e) => error!("Sync ({}) failed: {}", reason, e),
        }
    });
}

pub struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
    join: JoinHandle<()>,
}

impl SyncHandle {
    /// Returns `false` if the worker has already stopped.
    pub async fn sync_now(&self) -> bool {
        self.tx.send(SyncCommand::SyncNow).await.is_ok()
    }

    /// Stop the worker once every drain it started has finished.
    pub async fn stop(self) {
        let _ = self.tx.send(SyncCommand::Stop).await;
        let _ = self.join.await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
