use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::EnrichmentFault;

/// Guards the enrichment endpoint: caps in-flight calls and stops calling it for
/// a cooldown after repeated timeouts.
#[derive(Debug)]
pub struct CircuitBreaker {
    permits: Arc<Semaphore>,
    threshold: u32,
    cooldown: Duration,
    state: Arc<Mutex<BreakerState>>,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_timeouts: u32,
    open_until: Option<DateTime<Utc>>,
    /// Past the cooldown only one call may test the endpoint.
    half_open_in_flight: bool,
}

/// Held for the duration of one enrichment call.
#[derive(Debug)]
pub struct BreakerPermit {
    _permit: OwnedSemaphorePermit,
    probe: Option<Arc<Mutex<BreakerState>>>,
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if let Some(state) = self.probe.take() {
            lock_state(&state).half_open_in_flight = false;
        }
    }
}

fn lock_state(state: &Mutex<BreakerState>) -> std::sync::MutexGuard<'_, BreakerState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

impl CircuitBreaker {
    pub fn new(max_concurrency: usize, threshold: u32, cooldown_secs: i64) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            threshold: threshold.max(1),
            cooldown: Duration::seconds(cooldown_secs.max(1)),
            state: Arc::new(Mutex::new(BreakerState::default())),
        }
    }

    pub fn try_acquire(&self) -> Result<BreakerPermit, EnrichmentFault> {
        self.try_acquire_at(Utc::now())
    }

    /// Never waits: a full endpoint or an open breaker means "skip enrichment".
    /// Once the cooldown has passed, a single caller gets through as the probe
    /// until it records a success or a timeout, or drops its permit.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> Result<BreakerPermit, EnrichmentFault> {
        let mut g = self.lock();
        let probe = match g.open_until {
            Some(until) if now < until => return Err(EnrichmentFault::CircuitOpen),
            Some(_) if g.half_open_in_flight => return Err(EnrichmentFault::CircuitOpen),
            Some(_) => true,
            None => false,
        };
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| EnrichmentFault::CircuitOpen)?;
        if probe {
            g.half_open_in_flight = true;
        }
        Ok(BreakerPermit {
            _permit: permit,
            probe: probe.then(|| Arc::clone(&self.state)),
        })
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let g = self.lock();
        matches!(g.open_until, Some(until) if now < until)
    }

    pub fn record_success(&self) {
        let mut g = self.lock();
        g.consecutive_timeouts = 0;
        g.open_until = None;
        g.half_open_in_flight = false;
    }

    pub fn record_timeout(&self) {
        self.record_timeout_at(Utc::now());
    }

    /// Past the threshold, every further timeout (including the half-open probe)
    /// re-opens the breaker for a full cooldown.
    pub fn record_timeout_at(&self, now: DateTime<Utc>) {
        let mut g = self.lock();
        g.consecutive_timeouts = g.consecutive_timeouts.saturating_add(1);
        if g.consecutive_timeouts >= self.threshold {
            g.open_until = Some(now + self.cooldown);
            g.half_open_in_flight = false;
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        lock_state(&self.state)
    }
}
