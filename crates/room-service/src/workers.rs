//! Media worker pool.
//!
//! The pool owns every live [`MediaWorker`] and hands them out round-robin,
//! one per new room. Each worker is watched by a supervisor task: when the
//! worker dies it is removed from the pool at once, then a replacement is
//! spawned, retrying with a fixed delay until it succeeds or the pool shuts
//! down. Rooms already bound to the dead worker are not touched here.

use crate::errors::RoomError;
use crate::media::{MediaEngine, MediaWorker, WorkerSettings};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Round-robin pool of media workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    engine: Arc<dyn MediaEngine>,
    settings: WorkerSettings,
    respawn_delay: Duration,
    /// Guarded only across check-then-act sections, never across engine calls.
    state: Mutex<PoolState>,
    cancel_token: CancellationToken,
}

struct PoolState {
    workers: Vec<Arc<dyn MediaWorker>>,
    next_index: usize,
}

impl PoolInner {
    /// Remove a worker by id. Returns the remaining pool size.
    async fn remove(&self, worker_id: &str) -> usize {
        let mut state = self.state.lock().await;
        state.workers.retain(|w| w.id() != worker_id);
        let len = state.workers.len();
        if len > 0 {
            state.next_index %= len;
        } else {
            state.next_index = 0;
        }
        len
    }

    /// Add a worker. Returns the new pool size.
    async fn add(&self, worker: Arc<dyn MediaWorker>) -> usize {
        let mut state = self.state.lock().await;
        state.workers.push(worker);
        state.workers.len()
    }
}

impl WorkerPool {
    /// Spawn `num_workers` workers and start supervising them.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Media` if any initial worker fails to spawn; the
    /// workers spawned so far are closed.
    #[instrument(skip_all, name = "room.workers.start", fields(num_workers = num_workers))]
    pub async fn start(
        engine: Arc<dyn MediaEngine>,
        settings: WorkerSettings,
        num_workers: usize,
        respawn_delay: Duration,
    ) -> Result<Self, RoomError> {
        let mut workers: Vec<Arc<dyn MediaWorker>> = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            match engine.spawn_worker(&settings).await {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!(
                        target: "room.workers",
                        error = %e,
                        spawned = workers.len(),
                        "Failed to spawn media worker at startup"
                    );
                    for worker in &workers {
                        worker.close();
                    }
                    return Err(RoomError::Media(e));
                }
            }
        }

        let pool = Self {
            inner: Arc::new(PoolInner {
                engine,
                settings,
                respawn_delay,
                state: Mutex::new(PoolState {
                    workers: workers.clone(),
                    next_index: 0,
                }),
                cancel_token: CancellationToken::new(),
            }),
        };

        for worker in workers {
            tokio::spawn(supervise(Arc::clone(&pool.inner), worker));
        }

        metrics::set_workers_alive(num_workers);
        info!(target: "room.workers", num_workers, "Worker pool started");

        Ok(pool)
    }

    /// Pick the next live worker in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::NoWorkersAvailable` if the pool is empty, or
    /// `RoomError::Draining` after [`WorkerPool::close`].
    pub async fn acquire_worker(&self) -> Result<Arc<dyn MediaWorker>, RoomError> {
        if self.inner.cancel_token.is_cancelled() {
            return Err(RoomError::Draining);
        }

        let mut state = self.inner.state.lock().await;
        let len = state.workers.len();

        // A worker may have died before its supervisor removed it; skip it.
        for _ in 0..len {
            let index = state.next_index % len;
            state.next_index = (index + 1) % len;
            if let Some(worker) = state.workers.get(index) {
                if worker.is_alive() {
                    return Ok(Arc::clone(worker));
                }
            }
        }

        warn!(target: "room.workers", "No media workers available");
        Err(RoomError::NoWorkersAvailable)
    }

    /// Number of workers currently in the pool.
    pub async fn worker_count(&self) -> usize {
        self.inner.state.lock().await.workers.len()
    }

    /// Ids of the workers currently in the pool, in round-robin order.
    pub async fn worker_ids(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .await
            .workers
            .iter()
            .map(|w| w.id().to_string())
            .collect()
    }

    /// Stop supervision and close every worker.
    pub async fn close(&self) {
        self.inner.cancel_token.cancel();
        let workers = std::mem::take(&mut self.inner.state.lock().await.workers);
        for worker in &workers {
            worker.close();
        }
        metrics::set_workers_alive(0);
        info!(target: "room.workers", closed = workers.len(), "Worker pool closed");
    }
}

/// Watch one pool slot: wait for its worker to die, remove it, respawn.
async fn supervise(inner: Arc<PoolInner>, mut worker: Arc<dyn MediaWorker>) {
    loop {
        tokio::select! {
            () = inner.cancel_token.cancelled() => return,
            () = worker.died() => {}
        }

        let remaining = inner.remove(worker.id()).await;
        metrics::record_worker_death();
        metrics::set_workers_alive(remaining);
        warn!(
            target: "room.workers",
            worker_id = %worker.id(),
            remaining,
            "Media worker died, respawning"
        );

        worker = loop {
            if inner.cancel_token.is_cancelled() {
                return;
            }
            match inner.engine.spawn_worker(&inner.settings).await {
                Ok(replacement) => break replacement,
                Err(e) => {
                    metrics::record_worker_respawn_failure();
                    error!(
                        target: "room.workers",
                        error = %e,
                        retry_in_ms = inner.respawn_delay.as_millis(),
                        "Failed to respawn media worker"
                    );
                    tokio::select! {
                        () = inner.cancel_token.cancelled() => return,
                        () = tokio::time::sleep(inner.respawn_delay) => {}
                    }
                }
            }
        };

        if inner.cancel_token.is_cancelled() {
            worker.close();
            return;
        }

        let count = inner.add(Arc::clone(&worker)).await;
        metrics::set_workers_alive(count);
        info!(
            target: "room.workers",
            worker_id = %worker.id(),
            pool_size = count,
            "Media worker respawned"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::LocalMediaEngine;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            rtc_min_port: 40000,
            rtc_max_port: 40100,
        }
    }

    async fn start(engine: &LocalMediaEngine, n: usize) -> WorkerPool {
        WorkerPool::start(
            Arc::new(engine.clone()),
            settings(),
            n,
            Duration::from_millis(100),
        )
        .await
        .unwrap()
    }

    async fn wait_for_count(pool: &WorkerPool, expected: usize) {
        for _ in 0..100 {
            if pool.worker_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.worker_count().await, expected);
    }

    async fn wait_for_replacement(pool: &WorkerPool, dead: &str, expected: usize) -> Vec<String> {
        for _ in 0..100 {
            let ids = pool.worker_ids().await;
            if ids.len() == expected && !ids.iter().any(|id| id == dead) {
                return ids;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker {dead} was not replaced");
    }

    #[tokio::test]
    async fn test_round_robin_assignment() {
        let engine = LocalMediaEngine::new();
        let pool = start(&engine, 3).await;

        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(pool.acquire_worker().await.unwrap().id().to_string());
        }

        assert_eq!(ids[0..3], ids[3..6]);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[2]);
    }

    #[tokio::test]
    async fn test_startup_failure_is_fatal() {
        let engine = LocalMediaEngine::new();
        engine.fail_next_spawns(1);

        let result = WorkerPool::start(
            Arc::new(engine.clone()),
            settings(),
            2,
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(RoomError::Media(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_worker_is_replaced() {
        let engine = LocalMediaEngine::new();
        let pool = start(&engine, 2).await;
        let before = pool.worker_ids().await;

        assert!(engine.kill_worker(&before[0]).await);
        let after = wait_for_replacement(&pool, &before[0], 2).await;

        assert!(!after.contains(&before[0]));
        assert!(after.contains(&before[1]));
        assert_eq!(engine.spawned_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_respawn_retries_after_failures() {
        let engine = LocalMediaEngine::new();
        let pool = start(&engine, 1).await;
        let original = pool.worker_ids().await;

        engine.fail_next_spawns(3);
        assert!(engine.kill_worker(&original[0]).await);

        wait_for_count(&pool, 0).await;
        assert!(matches!(
            pool.acquire_worker().await,
            Err(RoomError::NoWorkersAvailable)
        ));

        // Three failures at 100ms spacing, then success.
        tokio::time::sleep(Duration::from_millis(500)).await;
        wait_for_count(&pool, 1).await;
        assert!(pool.acquire_worker().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_drains_pool() {
        let engine = LocalMediaEngine::new();
        let pool = start(&engine, 2).await;

        pool.close().await;

        assert_eq!(pool.worker_count().await, 0);
        assert!(engine.live_worker_ids().await.is_empty());
        assert!(matches!(
            pool.acquire_worker().await,
            Err(RoomError::Draining)
        ));
    }
}
