use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::sensor::{MeterSensor, UpdateOutcome};

/// Task status tracking
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub skipped_count: u64,
}

struct MeterTask {
    sensor: Arc<MeterSensor>,
    status: RwLock<TaskStatus>,
}

/// Runs the periodic update of every sensor.
pub struct SyncScheduler {
    interval: Duration,
    tasks: Vec<MeterTask>,
}

impl SyncScheduler {
    pub fn new(sensors: Vec<Arc<MeterSensor>>, interval: Duration) -> Self {
        let tasks = sensors
            .into_iter()
            .map(|sensor| MeterTask { sensor, status: RwLock::new(TaskStatus::default()) })
            .collect();
        Self { interval, tasks }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Arc<MeterSensor>> {
        self.tasks.iter().map(|t| &t.sensor)
    }

    pub fn sensor(&self, metering_point_id: &str) -> Option<&Arc<MeterSensor>> {
        self.task(metering_point_id).map(|t| &t.sensor)
    }

    fn task(&self, metering_point_id: &str) -> Option<&MeterTask> {
        self.tasks.iter().find(|t| t.sensor.metering_point_id() == metering_point_id)
    }

    /// Status per metering point.
    pub async fn status(&self) -> BTreeMap<String, TaskStatus> {
        let mut out = BTreeMap::new();
        for task in &self.tasks {
            out.insert(task.sensor.metering_point_id().to_string(), task.status.read().await.clone());
        }
        out
    }

    /// Spawn one update loop per sensor. The first update runs right away.
    pub fn start(self: Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let handles: Vec<_> = (0..self.tasks.len())
            .map(|idx| {
                let scheduler = self.clone();
                let token = token.clone();
                tokio::spawn(async move { scheduler.run_meter_task(idx, token).await })
            })
            .collect();
        info!(meters = handles.len(), interval = ?self.interval, "sync tasks started");
        handles
    }

    async fn run_meter_task(&self, idx: usize, token: CancellationToken) {
        let task = &self.tasks[idx];
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(metering_point_id = %task.sensor.metering_point_id(), "sync task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            info!(metering_point_id = %task.sensor.metering_point_id(), "sync cancelled mid-update");
                            break;
                        }
                        _ = Self::run_once(task) => {}
                    }
                }
            }
        }
    }

    /// Update one meter now. `None` for an unknown metering point.
    ///
    /// The update runs on its own task and completes even when the caller
    /// stops waiting for it.
    pub async fn trigger(self: &Arc<Self>, metering_point_id: &str) -> Option<UpdateOutcome> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.sensor.metering_point_id() == metering_point_id)?;
        info!(metering_point_id, "on-demand sync");

        let scheduler = self.clone();
        let handle = tokio::spawn(async move { Self::run_once(&scheduler.tasks[idx]).await });
        Some(match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(metering_point_id, error = %e, "on-demand sync task failed");
                UpdateOutcome::Failed(e.to_string())
            }
        })
    }

    async fn run_once(task: &MeterTask) -> UpdateOutcome {
        let now = Utc::now();
        let outcome = task.sensor.update(now).await;

        let mut status = task.status.write().await;
        match &outcome {
            UpdateOutcome::Skipped => status.skipped_count += 1,
            UpdateOutcome::Updated | UpdateOutcome::Inactive => {
                status.last_run = Some(now);
                status.run_count += 1;
                status.last_success = Some(now);
                status.success_count += 1;
                status.last_error = None;
            }
            UpdateOutcome::Failed(e) => {
                status.last_run = Some(now);
                status.run_count += 1;
                status.error_count += 1;
                status.last_error = Some(e.clone());
                error!(metering_point_id = %task.sensor.metering_point_id(), error = %e, "sync failed");
            }
        }
        outcome
    }
}
