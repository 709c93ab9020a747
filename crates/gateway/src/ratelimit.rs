//! Message admission control.
//!
//! Two independent mechanisms share one lock: a per-user concurrency gate
//! (at most one in-flight stream, failing fast rather than queuing) and
//! three sliding throughput windows (user/minute, user/hour, tenant/minute)
//! that only record an event when all three have headroom. A periodic sweep
//! evicts windows that have decayed to empty so memory stays bounded for
//! users and tenants no longer active.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use overture_config::RateConfig;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("another stream is already active for this user")]
    ConcurrentStream,

    #[error("per-user per-minute message limit exceeded")]
    UserMinuteExceeded,

    #[error("per-user hourly message limit exceeded")]
    UserHourExceeded,

    #[error("tenant per-minute message limit exceeded")]
    TenantMinuteExceeded,
}

/// Timestamps bounded by a retention duration and a count limit.
struct SlidingWindow {
    timestamps: VecDeque<Instant>,
    limit: usize,
    retention: Duration,
}

impl SlidingWindow {
    fn new(limit: usize, retention: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            limit,
            retention,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) >= self.retention {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Pure capacity check; records nothing.
    fn allow(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.timestamps.len() < self.limit
    }

    fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    fn is_empty(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.timestamps.is_empty()
    }
}

struct Inner {
    active_streams: HashSet<String>,
    user_minute: HashMap<String, SlidingWindow>,
    user_hour: HashMap<String, SlidingWindow>,
    tenant_minute: HashMap<String, SlidingWindow>,
}

/// The admission controller. One instance per process; state is shared and
/// guarded by a single mutex held only for map operations, never across an
/// await point or another lock.
pub struct RateLimiter {
    config: RateConfig,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(config: RateConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                active_streams: HashSet::new(),
                user_minute: HashMap::new(),
                user_hour: HashMap::new(),
                tenant_minute: HashMap::new(),
            }),
        }
    }

    /// Claim the user's single stream slot. A second concurrent claim fails
    /// immediately; there is no queue.
    pub fn acquire_stream(&self, user_id: &str) -> Result<(), RateLimitError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.active_streams.insert(user_id.to_string()) {
            warn!(user_id, "Concurrent stream rejected");
            return Err(RateLimitError::ConcurrentStream);
        }
        Ok(())
    }

    /// Release the user's stream slot. Safe to call when none is held.
    pub fn release_stream(&self, user_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.active_streams.remove(user_id);
    }

    /// Check all three throughput windows, in order, failing fast; record
    /// the event across all three only when every window has headroom.
    pub fn allow_message(&self, user_id: &str, tenant_id: &str) -> Result<(), RateLimitError> {
        self.allow_message_at(user_id, tenant_id, Instant::now())
    }

    fn allow_message_at(
        &self,
        user_id: &str,
        tenant_id: &str,
        now: Instant,
    ) -> Result<(), RateLimitError> {
        let user_minute_limit = self.config.user_per_minute;
        let user_hour_limit = self.config.user_per_hour;
        let tenant_minute_limit = self.config.tenant_per_minute;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if !inner
            .user_minute
            .entry(user_id.to_string())
            .or_insert_with(|| SlidingWindow::new(user_minute_limit, MINUTE))
            .allow(now)
        {
            return Err(RateLimitError::UserMinuteExceeded);
        }
        if !inner
            .user_hour
            .entry(user_id.to_string())
            .or_insert_with(|| SlidingWindow::new(user_hour_limit, HOUR))
            .allow(now)
        {
            return Err(RateLimitError::UserHourExceeded);
        }
        if !inner
            .tenant_minute
            .entry(tenant_id.to_string())
            .or_insert_with(|| SlidingWindow::new(tenant_minute_limit, MINUTE))
            .allow(now)
        {
            return Err(RateLimitError::TenantMinuteExceeded);
        }

        // All three have headroom; record everywhere or nowhere.
        inner.user_minute.get_mut(user_id).unwrap().record(now);
        inner.user_hour.get_mut(user_id).unwrap().record(now);
        inner.tenant_minute.get_mut(tenant_id).unwrap().record(now);
        Ok(())
    }

    /// Evict windows that have decayed to empty.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.user_minute.retain(|_, w| !w.is_empty(now));
        inner.user_hour.retain(|_, w| !w.is_empty(now));
        inner.tenant_minute.retain(|_, w| !w.is_empty(now));
        debug!(
            user_windows = inner.user_minute.len() + inner.user_hour.len(),
            tenant_windows = inner.tenant_minute.len(),
            "Rate limiter sweep complete"
        );
    }

    /// Run the periodic sweep for the lifetime of the returned task.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }

    #[cfg(test)]
    fn window_counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().unwrap();
        (
            inner.user_minute.len(),
            inner.user_hour.len(),
            inner.tenant_minute.len(),
        )
    }
}
