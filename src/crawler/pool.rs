use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::crawler::job::JobType;
use crate::crawler::worker::{CrawlContext, CrawlWorker};

/// Spawns a fixed set of workers per enabled job type and keeps them
/// running. The pool has no work-routing logic of its own; the per-type
/// queues are the only coordination between workers.
pub struct WorkerPool {
    ctx: Arc<CrawlContext>,
    enabled: Vec<JobType>,
    workers_per_type: usize,
}

impl WorkerPool {
    pub fn new(ctx: Arc<CrawlContext>, enabled: Vec<JobType>, workers_per_type: usize) -> Self {
        Self {
            ctx,
            enabled,
            workers_per_type,
        }
    }

    /// Runs until aborted. Workers never return; a panicked worker is
    /// logged and the rest keep going.
    pub async fn run(self) {
        let per_type = self.workers_per_type.max(1);
        info!(
            "starting {} workers ({} per type across {:?})",
            per_type * self.enabled.len(),
            per_type,
            self.enabled
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for &job_type in &self.enabled {
            for id in 0..per_type {
                let worker = CrawlWorker::new(id, job_type, self.ctx.clone());
                handles.push(tokio::spawn(worker.run()));
            }
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("worker task ended abnormally: {}", e);
            }
        }
    }
}
