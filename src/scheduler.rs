//! Background garbage collection
//!
//! One tokio task per cache instance, driven by a cron schedule. Each run
//! builds its staleness predicate from the cache's version *at run time*,
//! so a version bump takes effect on the very next run. When the config
//! slices a sweep across several runs, consecutive runs cycle through the
//! shard slices.

use crate::adapter::GcRange;
use crate::core::cache::CacheInner;
use crate::core::envelope::Envelope;
use chrono::Utc;
use cron::Schedule;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub(crate) fn spawn_gc_job(inner: Arc<CacheInner>, schedule: Schedule) -> JoinHandle<()> {
    let parts = inner.config.gc_complete_times.max(1) as usize;
    info!("starting scheduled gc job ({} run(s) per full sweep)", parts);

    tokio::spawn(async move {
        let mut run = 0usize;
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                debug!("gc schedule has no upcoming fire time, stopping job");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            let version = inner.version.load(Ordering::SeqCst);
            let is_expired =
                move |env: &Envelope| env.version != version || env.is_expired();
            let range = (parts > 1).then(|| GcRange {
                index: run % parts,
                parts,
            });

            debug!("gc run {} (range={:?})", run, range);
            if let Err(e) = inner.adapter.gc(&is_expired, range).await {
                // Scheduled maintenance is best effort; a failed run must
                // never kill the job.
                debug!("scheduled gc run failed: {}", e);
            }
            run = run.wrapping_add(1);
        }
    })
}
