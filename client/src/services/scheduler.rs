//! Repeating timers for background work.
//!
//! The notification poller never touches tokio timers directly; it asks a
//! [`Scheduler`] to run a tick callback at a fixed period and later cancels
//! it by id. Tests substitute a scheduler that fires ticks on demand.

use crate::errors::{ClientError, ClientResult};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Callback invoked on every timer tick.
pub type Tick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

pub trait Scheduler: Send + Sync {
    /// Starts a repeating timer. The first tick fires one `period` after
    /// the call.
    fn start(&self, period: Duration, tick: Tick) -> ClientResult<TimerId>;

    /// Cancels a timer. Unknown ids are ignored.
    fn stop(&self, id: TimerId);
}

/// Scheduler running each timer as a tokio task.
#[derive(Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    timers: Mutex<HashMap<TimerId, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_timers(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }
}

impl Scheduler for TokioScheduler {
    fn start(&self, period: Duration, tick: Tick) -> ClientResult<TimerId> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::internal("Polling requires a running tokio runtime"))?;

        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick().await;
            }
        });

        self.timers
            .lock()
            .map_err(|_| ClientError::internal("Timer registry lock poisoned"))?
            .insert(id, task);
        debug!("Started timer {:?} with period {:?}", id, period);
        Ok(id)
    }

    fn stop(&self, id: TimerId) {
        let handle = match self.timers.lock() {
            Ok(mut timers) => timers.remove(&id),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.abort();
            debug!("Stopped timer {:?}", id);
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.get_mut() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }
}
