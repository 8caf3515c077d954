//! Periodic heartbeat for a running job.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::manager::JobManager;

/// Ticker that refreshes `last_updated_at` while a job runs.
///
/// The first beat fires one full interval after start. A tick that finds the
/// record no longer Running ends the ticker on its own.
pub struct Heartbeat {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(manager: Arc<JobManager>, job_id: Uuid, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        match manager.heartbeat(job_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                debug!(job_id = %job_id, "job no longer running, stopping heartbeat");
                                break;
                            }
                            Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Stop the ticker and wait until it has exited, so no beat can land
    /// after this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "heartbeat task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{InMemoryJobStore, JobEvent, JobStatus};

    async fn running_job() -> (Arc<JobManager>, Uuid) {
        let manager = Arc::new(JobManager::new(Arc::new(InMemoryJobStore::new())));
        let id = manager
            .enqueue("Sync", |_token| async { Ok(()) })
            .await
            .unwrap();
        manager.try_dequeue().unwrap();
        manager.set_job_started(id).await.unwrap();
        (manager, id)
    }

    fn count_heartbeats(events: &mut tokio::sync::broadcast::Receiver<JobEvent>) -> usize {
        std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| matches!(event, JobEvent::Heartbeat { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn beats_once_per_interval() {
        let (manager, id) = running_job().await;
        let mut events = manager.subscribe();

        let heartbeat = Heartbeat::start(manager.clone(), id, Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(95)).await;
        heartbeat.stop().await;

        assert_eq!(count_heartbeats(&mut events), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_beats_after_stop() {
        let (manager, id) = running_job().await;
        let mut events = manager.subscribe();

        let heartbeat = Heartbeat::start(manager.clone(), id, Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        heartbeat.stop().await;
        let before = count_heartbeats(&mut events);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(before, 1);
        assert_eq!(count_heartbeats(&mut events), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ends_itself_once_job_leaves_running() {
        let (manager, id) = running_job().await;
        let heartbeat = Heartbeat::start(manager.clone(), id, Duration::from_secs(30));

        manager
            .set_job_completed(id, JobStatus::Completed, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(heartbeat.handle.is_finished());
        heartbeat.stop().await;
        assert_eq!(manager.get_job(id).unwrap().status, JobStatus::Completed);
    }
}
