//! `inquest worker` — run the worker pool and the reclaimer.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use inquest_core::config::InquestConfig;
use inquest_core::idgen::IdGenerator;
use inquest_core::orchestrator::{Orchestrator, OrchestratorConfig};
use inquest_core::queue::{Consumer, MessageProcessor, QueueDb, Reclaimer, ReclaimerConfig};
use inquest_core::store::Store;
use inquest_core::tracker::{GitlabTracker, IssueTracker, TrackerRegistry};
use inquest_core::types::Provider;
use inquest_core::worker::{Worker, WorkerConfig};
use planner_agent::HttpPlanner;

pub fn run(config_path: &Path, count_override: Option<usize>) -> anyhow::Result<()> {
    let (cfg, store, queue) = super::open_databases(config_path)?;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(run_until_interrupted(cfg, store, queue, count_override))
}

async fn run_until_interrupted(
    cfg: InquestConfig,
    store: Arc<Store>,
    queue: Arc<QueueDb>,
    count_override: Option<usize>,
) -> anyhow::Result<()> {
    let idgen = Arc::new(IdGenerator::new(cfg.node_id));

    let planner = Arc::new(
        HttpPlanner::new(
            cfg.planner.endpoint.clone(),
            Duration::from_secs(cfg.planner.timeout_secs),
        )
        .context("building planner client")?,
    );

    let mut trackers = TrackerRegistry::new();
    if let Some(gitlab) = &cfg.gitlab {
        let token = std::env::var(&gitlab.token_env)
            .with_context(|| format!("reading {}", gitlab.token_env))?;
        trackers.register(
            Provider::Gitlab,
            Arc::new(GitlabTracker::new(gitlab.base_url.clone(), token)) as Arc<dyn IssueTracker>,
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        planner,
        trackers,
        idgen,
        OrchestratorConfig {
            max_cycles: cfg.orchestrator.max_cycles,
            max_validation_retries: cfg.orchestrator.max_validation_retries,
            stuck_after: chrono::Duration::minutes(cfg.orchestrator.stuck_after_minutes),
        },
    ));

    let worker_cfg = WorkerConfig {
        poll_interval: Duration::from_secs(cfg.worker.poll_interval_secs),
        handle_timeout: Duration::from_secs(cfg.worker.handle_timeout_secs),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();

    let count = count_override.unwrap_or(cfg.worker.count).max(1);
    for i in 0..count {
        let consumer = Consumer::new(
            Arc::clone(&queue),
            cfg.queue.group.clone(),
            format!("worker-{}-{}", i, uuid::Uuid::new_v4()),
            cfg.worker.batch_size,
        );
        let worker = Worker::new(
            consumer,
            Arc::clone(&store),
            Arc::clone(&orchestrator),
            worker_cfg.clone(),
        );
        let rx = shutdown_rx.clone();
        tasks.spawn(async move { worker.run(rx).await });
    }

    // The reclaimer reprocesses through a worker of its own.
    let reclaimer_consumer = Consumer::new(
        Arc::clone(&queue),
        cfg.queue.group.clone(),
        format!("reclaimer-{}", uuid::Uuid::new_v4()),
        cfg.worker.batch_size,
    );
    let reclaimer_worker: Arc<dyn MessageProcessor> = Arc::new(Worker::new(
        reclaimer_consumer.clone(),
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        worker_cfg,
    ));
    let reclaimer = Reclaimer::new(
        Arc::clone(&queue),
        ReclaimerConfig {
            group: cfg.queue.group.clone(),
            consumer: reclaimer_consumer.name().to_string(),
            min_idle: Duration::from_secs(cfg.queue.reclaim_min_idle_secs),
            interval: Duration::from_secs(cfg.queue.reclaim_interval_secs),
            max_attempts: cfg.queue.max_attempts,
        },
        reclaimer_worker,
    );
    let rx = shutdown_rx.clone();
    tasks.spawn(async move { reclaimer.run(rx).await });

    tracing::info!(workers = count, group = %cfg.queue.group, "inquest worker pool started");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    shutdown_tx.send(true).ok();
    while tasks.join_next().await.is_some() {}
    Ok(())
}
