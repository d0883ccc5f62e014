//! Task scheduling and the build pipeline.
//!
//! One-shot mode runs every task sequentially and builds once. Scheduled
//! mode multiplexes the tasks on their cron expressions, serializes image
//! builds behind them and drains in two phases on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::aws::AwsClients;
use crate::error::{Result, SyncError};
use crate::image::{Build, ImageBuilder};
use crate::schedule::Schedule;
use crate::shutdown::{self, Shutdown};
use crate::spec::SyncSpec;
use crate::sync::{LinkResolver, S3ObjectStore, Syncer};

/// Validated runner inputs.
pub struct RunnerConfig {
    pub specs: Vec<SyncSpec>,
    pub tags: Vec<String>,
    pub stop_timeout: Duration,
    pub link_pattern: Option<Regex>,
}

/// One scheduled mirror task.
pub struct Task {
    syncer: Arc<Syncer>,
    schedule: Option<Schedule>,
    on_start: bool,
    label: String,
}

impl Task {
    pub fn new(
        syncer: Arc<Syncer>,
        schedule: Option<Schedule>,
        on_start: bool,
        label: impl Into<String>,
    ) -> Self {
        Self {
            syncer,
            schedule,
            on_start,
            label: label.into(),
        }
    }
}

pub struct Runner {
    tasks: Vec<Task>,
    builder: Option<Box<dyn Build>>,
    stop_timeout: Duration,
}

impl Runner {
    /// Wire syncers and the image builder from the configuration. All
    /// schedules and tags are validated here, before anything runs.
    pub fn new(config: RunnerConfig, aws: AwsClients) -> Result<Self> {
        let mut tasks = Vec::with_capacity(config.specs.len());
        for spec in &config.specs {
            let schedule = spec
                .schedule
                .as_deref()
                .map(str::parse::<Schedule>)
                .transpose()?;
            let store = Arc::new(S3ObjectStore::new(aws.s3(spec.region.as_deref())));
            let resolver = LinkResolver::new(config.link_pattern.clone());
            let syncer = Syncer::new(store, &spec.bucket, &spec.prefix, &spec.dst, resolver);
            let label = format!("s3://{}/{} -> {}", spec.bucket, spec.prefix, spec.dst);
            tasks.push(Task::new(Arc::new(syncer), schedule, spec.on_start, label));
        }

        let builder = if config.tags.is_empty() {
            None
        } else {
            Some(Box::new(ImageBuilder::from_specs(&config.tags, &config.specs, aws)?)
                as Box<dyn Build>)
        };

        Ok(Self {
            tasks,
            builder,
            stop_timeout: config.stop_timeout,
        })
    }

    /// Assemble a runner from already-built parts.
    pub fn from_parts(
        tasks: Vec<Task>,
        builder: Option<Box<dyn Build>>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            builder,
            stop_timeout,
        }
    }

    /// Run every task once, then build once. The first error aborts.
    pub async fn run_oneshot(mut self) -> Result<()> {
        let cancel = tokio_util::sync::CancellationToken::new();
        info!("starting sync");
        for task in &self.tasks {
            task.syncer.sync(&cancel).await?;
        }
        info!("finished sync");

        if let Some(builder) = self.builder.as_mut() {
            info!("starting image build");
            builder.build().await?;
            info!("finished image build");
        }
        Ok(())
    }

    /// Run in scheduled mode until SIGINT or SIGTERM.
    pub async fn run_scheduled(self) -> Result<()> {
        self.run_scheduled_until(async {
            if let Err(e) = shutdown::wait_for_signal().await {
                error!("signal handler failed: {e}");
            }
        })
        .await
    }

    /// Run in scheduled mode until `signal` completes, then drain: stop
    /// scheduling, let in-flight jobs finish for `stop_timeout`, and cancel
    /// whatever is still blocked after that.
    pub async fn run_scheduled_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Runner {
            tasks,
            builder,
            stop_timeout,
        } = self;

        let shutdown = Shutdown::new();
        let tree_lock = Arc::new(RwLock::new(()));
        let (change_tx, change_rx) = mpsc::channel::<()>(tasks.len().max(1));

        let mut workers: JoinSet<()> = JoinSet::new();
        if let Some(builder) = builder {
            workers.spawn(build_worker(
                builder,
                change_rx,
                Arc::clone(&tree_lock),
                shutdown.clone(),
            ));
        }

        // Startup passes run sequentially before scheduling begins; a
        // single change signal covers all of them.
        let startup: Vec<&Task> = tasks
            .iter()
            .filter(|task| task.schedule.is_none() || task.on_start)
            .collect();
        if !startup.is_empty() {
            info!("starting sync");
            let mut changed = false;
            for task in startup {
                match sync_once(task, &tree_lock, &shutdown).await {
                    Ok(task_changed) => changed = changed || task_changed,
                    Err(e) if e.is_interrupted() => {
                        info!("sync for {} interrupted by shutdown", task.label);
                    }
                    Err(e) => error!("sync failed for {}: {e}", task.label),
                }
            }
            info!("finished sync");
            if changed {
                let _ = change_tx.try_send(());
            }
        }

        for task in tasks.into_iter().filter(|task| task.schedule.is_some()) {
            workers.spawn(schedule_loop(
                task,
                change_tx.clone(),
                Arc::clone(&tree_lock),
                shutdown.clone(),
            ));
        }
        drop(change_tx);

        signal.await;
        info!("shutting down");
        shutdown.stop.cancel();

        if tokio::time::timeout(stop_timeout, drain(&mut workers))
            .await
            .is_err()
        {
            warn!("stop timeout exceeded, cancelling remaining jobs");
            shutdown.cancel.cancel();
            drain(&mut workers).await;
        } else {
            info!("all jobs stopped");
        }
        Ok(())
    }
}

/// One guarded, lock-ordered sync pass.
///
/// The tree lock's read side keeps builds out while the pass mutates the
/// destination; the stop token is checked once the lock is held, and the
/// pass body races the hard-cancel token.
async fn sync_once(task: &Task, tree_lock: &RwLock<()>, shutdown: &Shutdown) -> Result<bool> {
    let _tree = tree_lock.read().await;
    if shutdown.stop.is_cancelled() {
        return Err(SyncError::Interrupted);
    }

    info!("starting sync for {}", task.label);
    let result = tokio::select! {
        _ = shutdown.cancel.cancelled() => Err(SyncError::Interrupted),
        result = task.syncer.sync(&shutdown.cancel) => result,
    };
    if let Ok(changed) = &result {
        info!("finished sync for {} (changed={changed})", task.label);
    }
    result
}

/// Fire one task on its schedule until shutdown.
///
/// Fires are admitted through a single-slot guard: when the previous pass
/// of this task is still running the fire is dropped, never queued. The
/// pass itself runs on a separate tokio task so a slow pass cannot delay
/// the timer.
async fn schedule_loop(
    task: Task,
    change_tx: mpsc::Sender<()>,
    tree_lock: Arc<RwLock<()>>,
    shutdown: Shutdown,
) {
    let Some(schedule) = task.schedule.clone() else {
        return;
    };
    let task = Arc::new(task);
    let guard = Arc::new(Semaphore::new(1));
    let mut runs: JoinSet<()> = JoinSet::new();

    let mut after = Utc::now();
    loop {
        let Some(next) = schedule.next_after(after) else {
            info!("schedule for {} has no future fire", task.label);
            break;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = shutdown.stop.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        after = next;

        match Arc::clone(&guard).try_acquire_owned() {
            Ok(permit) => {
                let task = Arc::clone(&task);
                let tree_lock = Arc::clone(&tree_lock);
                let shutdown = shutdown.clone();
                let change_tx = change_tx.clone();
                runs.spawn(async move {
                    let _permit = permit;
                    match sync_once(&task, &tree_lock, &shutdown).await {
                        Ok(true) => {
                            let _ = change_tx.try_send(());
                        }
                        Ok(false) => {}
                        Err(e) if e.is_interrupted() => {
                            info!("sync for {} interrupted by shutdown", task.label);
                        }
                        Err(e) => error!("sync failed for {}: {e}", task.label),
                    }
                });
            }
            Err(_) => warn!("a previous job is still running for {}", task.label),
        }

        while runs.try_join_next().is_some() {}
    }

    // keep shutdown waiting on in-flight passes of this task
    while runs.join_next().await.is_some() {}
}

/// Consume change signals and run builds one at a time, holding the tree
/// lock's write side so every destination is quiescent while the layer
/// tarball is cut.
async fn build_worker(
    mut builder: Box<dyn Build>,
    mut changes: mpsc::Receiver<()>,
    tree_lock: Arc<RwLock<()>>,
    shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            _ = shutdown.stop.cancelled() => break,
            signal = changes.recv() => {
                if signal.is_none() {
                    break;
                }
                let _tree = tree_lock.write().await;
                if shutdown.stop.is_cancelled() {
                    break;
                }
                info!("starting image build");
                let result = tokio::select! {
                    _ = shutdown.cancel.cancelled() => Err(SyncError::Interrupted),
                    result = builder.build() => result,
                };
                match result {
                    Ok(()) => info!("finished image build"),
                    Err(e) if e.is_interrupted() => {
                        info!("image build interrupted by shutdown");
                    }
                    Err(e) => error!("image build failed: {e}"),
                }
            }
        }
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            if e.is_panic() {
                error!("worker task panicked: {e}");
            }
        }
    }
}
