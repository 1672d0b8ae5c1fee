//! The periodic tick that turns due plans into pending jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use vigil_types::{Job, Result};

use crate::repository::{JobQueue, PlanRepository};
use crate::schedule::ScheduleBook;

pub const DEFAULT_TICK: Duration = Duration::from_secs(15);

pub struct Coordinator {
    plans: Arc<dyn PlanRepository>,
    queue: Arc<dyn JobQueue>,
    book: ScheduleBook,
    tick: Duration,
}

impl Coordinator {
    pub fn new(plans: Arc<dyn PlanRepository>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            plans,
            queue,
            book: ScheduleBook::new(),
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn book(&self) -> &ScheduleBook {
        &self.book
    }

    /// Enqueue a job for every plan due at `now`. Returns the new jobs.
    ///
    /// Safe to call concurrently: each plan's window is claimed at most once.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut enqueued = Vec::new();
        for stored in self.plans.list_plans().await? {
            let Some(window) = self.book.claim(&stored.id, &stored.plan.frequency, now) else {
                continue;
            };
            let job = Job::pending(&stored.id, &stored.plan.environment, window);
            if let Err(e) = self.queue.enqueue(job.clone()).await {
                self.book.release(&stored.id, window);
                return Err(e);
            }
            tracing::info!(
                plan = %stored.plan.name,
                plan_id = %stored.id,
                job = %job.id,
                window = %window,
                "Job enqueued"
            );
            enqueued.push(job);
        }
        Ok(enqueued)
    }

    /// Tick until `shutdown` reads `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "Coordinator started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        tracing::warn!(error = %e, "Scheduling tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Coordinator stopped");
    }
}
