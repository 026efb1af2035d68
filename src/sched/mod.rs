//! Interval scheduler - named, visibility-aware polling tasks
//!
//! Each registered task runs in its own spawned loop with fixed-delay
//! semantics: the next firing is armed only after the previous callback
//! settles, so a slow fetch never piles up repeated invocations of the same
//! task. Different task names run independently.
//!
//! Visibility drives cadence: while hidden, a task either pauses entirely
//! (`pause_on_hidden`) or drops to its background interval. A hidden→visible
//! transition fires the task immediately and restores the active cadence.

pub mod visibility;

pub use visibility::{Visibility, VisibilitySignal};

use crate::error::EngineResult;

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Async callback run on every firing of a task
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// Cadence configuration for one task
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub active_interval: Duration,
    pub background_interval: Duration,
    pub pause_on_hidden: bool,
}

struct TaskHandle {
    stop: watch::Sender<bool>,
}

/// Registry of named polling loops
pub struct IntervalScheduler {
    visibility: Arc<dyn Visibility>,
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl IntervalScheduler {
    pub fn new(visibility: Arc<dyn Visibility>) -> Self {
        Self {
            visibility,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Register a task under a unique name. Re-registering a live name
    /// replaces its configuration and timer; two timers never coexist for
    /// one name. The first firing happens one interval after registration.
    pub async fn register(&self, name: &str, task: TaskFn, config: TaskConfig) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let vis_rx = self.visibility.watch();

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.insert(name.to_string(), TaskHandle { stop: stop_tx }) {
            // Old loop exits at its next suspension point; an in-flight
            // callback runs to completion and its result is discarded.
            let _ = old.stop.send(true);
            debug!("Replacing polling task {}", name);
        }
        crate::metrics::record_task_count(tasks.len());
        drop(tasks);

        info!(
            "Registered polling task {} (active {:?}, background {:?}, pause_on_hidden {})",
            name, config.active_interval, config.background_interval, config.pause_on_hidden
        );

        let task_name = name.to_string();
        tokio::spawn(Self::run_task(task_name, task, config, vis_rx, stop_rx));
    }

    /// Cancel a task's timer and drop its bookkeeping. Unknown names are a
    /// silent no-op so teardown code is safe to call redundantly.
    pub async fn unregister(&self, name: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.remove(name) {
            let _ = handle.stop.send(true);
            info!("Unregistered polling task {}", name);
        }
        crate::metrics::record_task_count(tasks.len());
    }

    /// Whether a task is currently registered
    pub async fn is_registered(&self, name: &str) -> bool {
        self.tasks.lock().await.contains_key(name)
    }

    /// Number of registered tasks
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Stop every task (process shutdown)
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (name, handle) in tasks.drain() {
            let _ = handle.stop.send(true);
            debug!("Stopped polling task {}", name);
        }
    }

    async fn run_task(
        name: String,
        task: TaskFn,
        config: TaskConfig,
        mut vis_rx: watch::Receiver<bool>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            let hidden = *vis_rx.borrow_and_update();

            if hidden && config.pause_on_hidden {
                // Paused: nothing fires until visibility returns, then the
                // task fires immediately and resumes the active cadence.
                tokio::select! {
                    changed = vis_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if !*vis_rx.borrow_and_update() {
                            Self::fire(&name, &task).await;
                        }
                    }
                    res = stop_rx.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            let delay = if hidden {
                config.background_interval
            } else {
                config.active_interval
            };

            tokio::select! {
                _ = sleep(delay) => {
                    Self::fire(&name, &task).await;
                }
                changed = vis_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // hidden -> visible fires immediately; visible -> hidden
                    // just rearms the timer at the background cadence.
                    if hidden && !*vis_rx.borrow_and_update() {
                        Self::fire(&name, &task).await;
                    }
                }
                res = stop_rx.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Polling task {} loop exited", name);
    }

    async fn fire(name: &str, task: &TaskFn) {
        crate::metrics::record_task_fire(name);
        if let Err(e) = task().await {
            crate::metrics::record_task_error(name);
            if e.is_retryable() {
                warn!("Polling task {} failed, will retry next tick: {}", name, e);
            } else {
                error!("Polling task {} failed: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(calls: Arc<AtomicUsize>) -> TaskFn {
        Arc::new(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    fn slow_task(started: Arc<AtomicUsize>, settled: Arc<AtomicUsize>, work: Duration) -> TaskFn {
        Arc::new(move || {
            let started = started.clone();
            let settled = settled.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                sleep(work).await;
                settled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    fn config(active_ms: u64, background_ms: u64, pause_on_hidden: bool) -> TaskConfig {
        TaskConfig {
            active_interval: Duration::from_millis(active_ms),
            background_interval: Duration::from_millis(background_ms),
            pause_on_hidden,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_the_active_cadence_while_visible() {
        let vis = Arc::new(VisibilitySignal::new(false));
        let sched = IntervalScheduler::new(vis);
        let calls = Arc::new(AtomicUsize::new(0));

        sched
            .register("tokens", counting_task(calls.clone()), config(30_000, 90_000, false))
            .await;

        sleep(Duration::from_millis(30_010)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(30_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_prevents_self_overlap() {
        let vis = Arc::new(VisibilitySignal::new(false));
        let sched = IntervalScheduler::new(vis);
        let started = Arc::new(AtomicUsize::new(0));
        let settled = Arc::new(AtomicUsize::new(0));

        // 5s interval, 10s of work per firing: firings land at 5s, 20s, ...
        sched
            .register(
                "pools",
                slow_task(started.clone(), settled.clone(), Duration::from_millis(10_000)),
                config(5_000, 15_000, false),
            )
            .await;

        sleep(Duration::from_millis(6_000)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(settled.load(Ordering::SeqCst), 0);

        // Previous invocation still running at 10s; no second start
        sleep(Duration::from_millis(4_000)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(6_000)).await;
        assert_eq!(settled.load(Ordering::SeqCst), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reregistering_replaces_the_existing_timer() {
        let vis = Arc::new(VisibilitySignal::new(false));
        let sched = IntervalScheduler::new(vis);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        sched
            .register("tokens", counting_task(first.clone()), config(10_000, 30_000, false))
            .await;
        sched
            .register("tokens", counting_task(second.clone()), config(5_000, 15_000, false))
            .await;
        assert_eq!(sched.task_count().await, 1);

        sleep(Duration::from_millis(20_100)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_stops_firing_and_unknown_names_are_no_ops() {
        let vis = Arc::new(VisibilitySignal::new(false));
        let sched = IntervalScheduler::new(vis);
        let calls = Arc::new(AtomicUsize::new(0));

        sched.unregister("never-registered").await;

        sched
            .register("chains", counting_task(calls.clone()), config(10_000, 30_000, false))
            .await;
        sleep(Duration::from_millis(10_010)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sched.unregister("chains").await;
        assert!(!sched.is_registered("chains").await);

        sleep(Duration::from_millis(50_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sched.unregister("chains").await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_on_hidden_suspends_then_fires_immediately_on_return() {
        let vis = Arc::new(VisibilitySignal::new(false));
        let sched = IntervalScheduler::new(vis.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        sched
            .register("tokens", counting_task(calls.clone()), config(10_000, 30_000, true))
            .await;

        sleep(Duration::from_millis(10_010)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        vis.set_hidden(true);
        sleep(Duration::from_millis(60_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        vis.set_hidden(false);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Active cadence resumes from the immediate fire
        sleep(Duration::from_millis(10_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn background_cadence_applies_while_hidden() {
        let vis = Arc::new(VisibilitySignal::new(false));
        let sched = IntervalScheduler::new(vis.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        sched
            .register("pools", counting_task(calls.clone()), config(30_000, 90_000, false))
            .await;

        sleep(Duration::from_millis(30_010)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        vis.set_hidden(true);
        sleep(Duration::from_millis(10)).await;

        // Hidden: next firing one background interval out, not an active one
        sleep(Duration::from_millis(30_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        sleep(Duration::from_millis(60_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Visible again: the very next firing is immediate, then 30s cadence
        vis.set_hidden(false);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        sleep(Duration::from_millis(30_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
