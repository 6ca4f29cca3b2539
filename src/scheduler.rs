use std::sync::Arc;

use tokio::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use log::{error, info};

use crate::pipeline::{Pipeline, RequestStatus};
use crate::settings::SchedulerConfig;

async fn run_once(pipeline: &Pipeline) {
    let result = pipeline.process_next().await;
    match result.status {
        RequestStatus::Success => info!("Scheduled run replied to one message"),
        RequestStatus::NoUnreadMessage => {}
        RequestStatus::Failure => error!("Scheduled run failed: {}", result.message),
    }
}

/// Triggers the pipeline every `check_interval` seconds in the background.
/// Runs go through the same single-flight guard as HTTP triggers.
pub async fn entrypoint(
    config: &SchedulerConfig,
    pipeline: Arc<Pipeline>,
) -> Result<JobScheduler, Box<dyn std::error::Error>> {
    let sched = JobScheduler::new().await?;

    // Add a job that runs every N seconds
    sched
        .add(Job::new_repeated_async(
            Duration::from_secs(config.interval_seconds),
            move |_uuid, _l| {
                let pipeline = Arc::clone(&pipeline);
                Box::pin(async move {
                    run_once(&pipeline).await;
                })
            },
        )?)
        .await?;

    // Start the scheduler
    sched.start().await?;
    info!("Polling the inbox every {}s", config.interval_seconds);

    Ok(sched)
}
