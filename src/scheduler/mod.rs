//! Periodic discovery scheduler
//!
//! A single timer drives cycles. Each cycle enumerates users active since the
//! last successful enumeration (plus users whose previous run failed) and runs
//! the coordinator for each on a semaphore-bounded pool. One user's failure or
//! panic never affects another's run.

mod cancel;

pub use cancel::CancellationToken;

use crate::config::SchedulerConfig;
use crate::coordinator::{CoordinatorError, DiscoveryCoordinator};
use crate::corpus::UserId;
use crate::discovery::Discovery;
use crate::storage::{ActiveUserSource, StorageError};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("failed to enumerate active users: {0}")]
    Enumeration(#[source] StorageError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("run for user {0} panicked")]
    Panicked(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Outcome of one scheduling cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Users selected for this cycle
    pub users: usize,
    pub succeeded: usize,
    pub failed: Vec<UserId>,
    /// Not started because shutdown began
    pub skipped: usize,
    /// Discoveries persisted across all users
    pub discoveries: usize,
    /// Set when the cycle ended early because enumeration failed
    pub enumeration_error: Option<String>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            users: 0,
            succeeded: 0,
            failed: Vec::new(),
            skipped: 0,
            discoveries: 0,
            enumeration_error: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    coordinator: Arc<DiscoveryCoordinator>,
    users: Arc<dyn ActiveUserSource>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    state: Mutex<SchedulerState>,
    last_success: Mutex<Option<DateTime<Utc>>>,
    retry: Mutex<BTreeSet<UserId>>,
    last_cycle: Mutex<Option<CycleReport>>,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        let mut current = lock(&self.state);
        if *current != SchedulerState::Stopped {
            *current = state;
        }
    }

    async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let mut report = CycleReport::new(started_at);
        self.set_state(SchedulerState::Running);

        let since = lock(&self.last_success)
            .unwrap_or_else(|| started_at - self.config.initial_lookback());
        let active = match self.users.list_users_with_recent_activity(since).await {
            Ok(users) => users,
            Err(e) => {
                let err = SchedulerError::Enumeration(e);
                warn!(error = %err, "cycle ended early");
                report.enumeration_error = Some(err.to_string());
                return self.finish(report);
            }
        };
        *lock(&self.last_success) = Some(started_at);

        let selected: BTreeSet<UserId> = {
            let mut retry = lock(&self.retry);
            active.into_iter().chain(std::mem::take(&mut *retry)).collect()
        };
        report.users = selected.len();
        info!(users = report.users, since = %since, "discovery cycle started");

        let mut handles = Vec::with_capacity(selected.len());
        for user in selected {
            if self.cancel.is_cancelled() {
                report.skipped += 1;
                continue;
            }
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    report.skipped += 1;
                    continue;
                }
            };
            if self.cancel.is_cancelled() {
                report.skipped += 1;
                continue;
            }
            let coordinator = Arc::clone(&self.coordinator);
            let task_user = user.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                coordinator.run(&task_user).await
            });
            handles.push((user, handle));
        }

        for (user, handle) in handles {
            let result = match handle.await {
                Ok(result) => result.map_err(SchedulerError::from),
                Err(_) => Err(SchedulerError::Panicked(user.clone())),
            };
            match result {
                Ok(found) => {
                    report.succeeded += 1;
                    report.discoveries += found.len();
                }
                Err(e) => {
                    warn!(user_id = %user, error = %e, "user run failed, retrying next cycle");
                    lock(&self.retry).insert(user.clone());
                    report.failed.push(user);
                }
            }
        }

        self.finish(report)
    }

    fn finish(&self, mut report: CycleReport) -> CycleReport {
        report.finished_at = Utc::now();
        info!(
            users = report.users,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            skipped = report.skipped,
            discoveries = report.discoveries,
            duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "discovery cycle finished"
        );
        *lock(&self.last_cycle) = Some(report.clone());
        self.set_state(SchedulerState::Idle);
        report
    }

    async fn run_user(&self, user_id: &UserId) -> Result<Vec<Discovery>, SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SchedulerError::ShuttingDown)?;
        let coordinator = Arc::clone(&self.coordinator);
        let task_user = user_id.clone();
        match tokio::spawn(async move { coordinator.run(&task_user).await }).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SchedulerError::Panicked(user_id.clone())),
        }
    }
}

/// Periodic scheduler. Call [`Scheduler::start`] to begin ticking.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<DiscoveryCoordinator>,
        users: Arc<dyn ActiveUserSource>,
        config: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_users.max(1)));
        Self {
            shared: Arc::new(Shared {
                coordinator,
                users,
                config,
                permits,
                cancel: CancellationToken::new(),
                state: Mutex::new(SchedulerState::Idle),
                last_success: Mutex::new(None),
                retry: Mutex::new(BTreeSet::new()),
                last_cycle: Mutex::new(None),
            }),
        }
    }

    /// Run one cycle now, outside the timer.
    pub async fn run_cycle(&self) -> CycleReport {
        self.shared.run_cycle().await
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.shared.state)
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        lock(&self.shared.last_cycle).clone()
    }

    /// Start the timer loop. The first cycle runs after one interval unless
    /// `run_on_startup` is set.
    pub fn start(self) -> SchedulerHandle {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !shared.config.run_on_startup {
                // interval's first tick completes immediately
                ticker.tick().await;
            }
            info!(
                interval_secs = shared.config.interval_secs,
                max_concurrent_users = shared.config.max_concurrent_users,
                "scheduler started"
            );
            loop {
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if shared.cancel.is_cancelled() {
                            break;
                        }
                        shared.run_cycle().await;
                    }
                }
            }
            debug!("scheduler loop exited");
        });
        SchedulerHandle {
            shared: self.shared,
            task,
        }
    }
}

/// Control handle for a running scheduler.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *lock(&self.shared.state)
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        lock(&self.shared.last_cycle).clone()
    }

    /// Run discovery for one user now, outside the cadence.
    pub async fn trigger(&self, user_id: &UserId) -> Result<Vec<Discovery>, SchedulerError> {
        info!(user_id = %user_id, "manual discovery trigger");
        self.shared.run_user(user_id).await
    }

    /// Stop ticking, let in-flight user runs finish, skip the rest.
    pub async fn shutdown(self) {
        info!("scheduler shutting down");
        self.shared.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "scheduler loop ended abnormally");
        }
        *lock(&self.shared.state) = SchedulerState::Stopped;
        info!("scheduler stopped");
    }
}
