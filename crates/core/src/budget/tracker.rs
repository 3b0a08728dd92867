use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use raidsync_common::error::CommonError;
use raidsync_common::time::{Clock, SystemClock};

/// Configuration for budget admission policy
///
/// The thresholds are policy constants copied from operational experience;
/// they are configuration, not invariants.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Background work pauses once usage reaches this percentage
    pub pause_threshold_pct: f64,
    /// Live requests are refused once usage reaches this percentage
    pub live_threshold_pct: f64,
    /// Fraction of the quota reserved for live traffic when sizing
    /// background batches
    pub live_reserve_fraction: f64,
    /// Extra wait beyond the reset time before resuming, absorbing clock
    /// skew against the upstream
    pub reset_buffer: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            pause_threshold_pct: 80.0,
            live_threshold_pct: 95.0,
            live_reserve_fraction: 0.2,
            reset_buffer: Duration::from_secs(1),
        }
    }
}

impl BudgetConfig {
    /// Create a new configuration builder
    pub fn builder() -> BudgetConfigBuilder {
        BudgetConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CommonError> {
        if !(0.0..=100.0).contains(&self.pause_threshold_pct) || self.pause_threshold_pct == 0.0 {
            return Err(CommonError::config_field(
                "pause_threshold_pct",
                "must be in (0, 100]",
            ));
        }
        if !(0.0..=100.0).contains(&self.live_threshold_pct) || self.live_threshold_pct == 0.0 {
            return Err(CommonError::config_field("live_threshold_pct", "must be in (0, 100]"));
        }
        if self.live_threshold_pct < self.pause_threshold_pct {
            return Err(CommonError::config_field(
                "live_threshold_pct",
                "must not be below pause_threshold_pct",
            ));
        }
        if !(0.0..1.0).contains(&self.live_reserve_fraction) {
            return Err(CommonError::config_field(
                "live_reserve_fraction",
                "must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// Builder for BudgetConfig
#[derive(Debug, Default)]
pub struct BudgetConfigBuilder {
    config: BudgetConfig,
}

impl BudgetConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self { config: BudgetConfig::default() }
    }

    /// Set the background pause threshold percentage
    pub fn pause_threshold_pct(mut self, pct: f64) -> Self {
        self.config.pause_threshold_pct = pct;
        self
    }

    /// Set the live refusal threshold percentage
    pub fn live_threshold_pct(mut self, pct: f64) -> Self {
        self.config.live_threshold_pct = pct;
        self
    }

    /// Set the live reserve fraction used for capacity sizing
    pub fn live_reserve_fraction(mut self, fraction: f64) -> Self {
        self.config.live_reserve_fraction = fraction;
        self
    }

    /// Set the buffer added to the reset wait
    pub fn reset_buffer(mut self, buffer: Duration) -> Self {
        self.config.reset_buffer = buffer;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<BudgetConfig, CommonError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Pause/resume notification delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetEvent {
    /// Background consumption must stop (threshold reached or manual pause)
    Paused,
    /// Background consumption may continue
    Resumed,
}

/// Identifier returned by `subscribe`, required for unregistration
pub type ListenerId = u64;

type Listener = Box<dyn Fn(BudgetEvent) + Send + Sync>;

/// Point-in-time view of the budget for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub points_used: f64,
    pub points_max: f64,
    pub percent_used: f64,
    pub reset_at_ms: u64,
    pub last_updated_ms: u64,
    pub manual_pause: bool,
}

#[derive(Debug)]
struct BudgetState {
    points_used: f64,
    points_max: f64,
    reset_at_ms: u64,
    last_updated_ms: u64,
    manual_pause: bool,
    /// Last pause state pushed to subscribers; events fire only on edges
    notified_paused: bool,
}

/// Tracker for the rolling upstream request quota
///
/// Explicitly constructed and dependency-injected by the composition root;
/// both the live path and the work queue consult it before any upstream
/// call, and the fetch collaborator reports authoritative usage back after
/// every call.
pub struct BudgetTracker<C: Clock = SystemClock> {
    state: Arc<RwLock<BudgetState>>,
    config: BudgetConfig,
    listeners: Arc<RwLock<HashMap<ListenerId, Listener>>>,
    next_listener_id: Arc<AtomicU64>,
    clock: C,
}

impl BudgetTracker<SystemClock> {
    /// Create a new tracker with the system clock
    pub fn new(config: BudgetConfig) -> Result<Self, CommonError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> BudgetTracker<C> {
    /// Create a new tracker with a custom clock (useful for testing)
    pub fn with_clock(config: BudgetConfig, clock: C) -> Result<Self, CommonError> {
        config.validate()?;

        Ok(Self {
            state: Arc::new(RwLock::new(BudgetState {
                points_used: 0.0,
                points_max: 0.0,
                reset_at_ms: 0,
                last_updated_ms: 0,
                manual_pause: false,
                notified_paused: false,
            })),
            config,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_listener_id: Arc::new(AtomicU64::new(1)),
            clock,
        })
    }

    /// Authoritative refresh after any upstream call
    ///
    /// Recomputes the reset deadline from `reset_in` and fires a pause or
    /// resume notification when the composed pause state crosses an edge.
    /// Always succeeds.
    #[instrument(skip(self))]
    pub fn update_from_upstream(&self, used: f64, max: f64, reset_in: Duration) {
        let event = {
            let mut state = self.write_state();
            let now = self.clock.millis_since_epoch();

            state.points_used = used.max(0.0);
            state.points_max = max.max(0.0);
            state.reset_at_ms = now.saturating_add(reset_in.as_millis() as u64);
            state.last_updated_ms = now;

            debug!(
                used = state.points_used,
                max = state.points_max,
                percent = percent_used(&state),
                "Budget updated from upstream"
            );

            self.detect_edge(&mut state)
        };

        self.fire(event);
    }

    /// Admission check for queue-driven background work
    ///
    /// Manual pause always denies. An elapsed quota window resets usage to
    /// zero before evaluating.
    pub fn can_proceed_background(&self) -> bool {
        let (allowed, event) = {
            let mut state = self.write_state();

            if state.manual_pause {
                return false;
            }

            let now = self.clock.millis_since_epoch();
            if now > state.reset_at_ms {
                self.reset_usage(&mut state, now);
                let event = self.detect_edge(&mut state);
                (true, event)
            } else {
                (percent_used(&state) < self.config.pause_threshold_pct, None)
            }
        };

        self.fire(event);
        allowed
    }

    /// Admission check for live, user-triggered work
    ///
    /// Live requests get priority and only stop near the hard limit.
    pub fn can_proceed_live(&self) -> bool {
        let (allowed, event) = {
            let mut state = self.write_state();

            let now = self.clock.millis_since_epoch();
            if now > state.reset_at_ms {
                self.reset_usage(&mut state, now);
                let event = self.detect_edge(&mut state);
                (true, event)
            } else {
                (percent_used(&state) < self.config.live_threshold_pct, None)
            }
        };

        self.fire(event);
        allowed
    }

    /// Remaining capacity available to background work
    ///
    /// `max - (max * live_reserve_fraction) - used`, floored at zero; the
    /// queue uses this to size batches.
    pub fn background_capacity(&self) -> f64 {
        let state = self.read_state();
        let reserved = state.points_max * self.config.live_reserve_fraction;
        (state.points_max - reserved - state.points_used).max(0.0)
    }

    /// Suspend until the quota window resets, then zero usage
    ///
    /// Sleeps until `reset_at` plus the configured buffer. Safe to call from
    /// multiple tasks; each zeroes usage on wake, which is idempotent.
    pub async fn wait_for_reset(&self) {
        let target_ms = {
            let state = self.read_state();
            state.reset_at_ms.saturating_add(self.config.reset_buffer.as_millis() as u64)
        };

        let now = self.clock.millis_since_epoch();
        if target_ms > now {
            tokio::time::sleep(Duration::from_millis(target_ms - now)).await;
        }

        let event = {
            let mut state = self.write_state();
            let now = self.clock.millis_since_epoch();
            self.reset_usage(&mut state, now);
            self.detect_edge(&mut state)
        };

        self.fire(event);
        info!("Budget window reset; usage zeroed");
    }

    /// Operator override pausing or resuming all background consumption
    ///
    /// Independent of, and composed with, the threshold check.
    pub fn set_manual_pause(&self, paused: bool) {
        let event = {
            let mut state = self.write_state();
            state.manual_pause = paused;
            self.detect_edge(&mut state)
        };

        if paused {
            warn!("Budget manually paused by operator");
        } else {
            info!("Budget manual pause lifted");
        }

        self.fire(event);
    }

    /// Operator action zeroing usage without waiting for the window
    pub fn force_reset(&self) {
        let event = {
            let mut state = self.write_state();
            let now = self.clock.millis_since_epoch();
            self.reset_usage(&mut state, now);
            self.detect_edge(&mut state)
        };

        info!("Budget force-reset by operator");
        self.fire(event);
    }

    /// Register a pause/resume listener; keep the id for unsubscription
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(BudgetEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::Relaxed);
        match self.listeners.write() {
            Ok(mut listeners) => {
                listeners.insert(id, Box::new(listener));
            }
            Err(poisoned) => {
                warn!("Budget listener registry lock poisoned");
                poisoned.into_inner().insert(id, Box::new(listener));
            }
        }
        id
    }

    /// Remove a previously registered listener
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.remove(&id).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&id).is_some(),
        }
    }

    /// Point-in-time view for the admin surface
    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.read_state();
        BudgetSnapshot {
            points_used: state.points_used,
            points_max: state.points_max,
            percent_used: percent_used(&state),
            reset_at_ms: state.reset_at_ms,
            last_updated_ms: state.last_updated_ms,
            manual_pause: state.manual_pause,
        }
    }

    fn reset_usage(&self, state: &mut BudgetState, now_ms: u64) {
        state.points_used = 0.0;
        state.last_updated_ms = now_ms;
    }

    /// Compare the composed pause state against the last notified state;
    /// returns the event to fire when an edge was crossed.
    fn detect_edge(&self, state: &mut BudgetState) -> Option<BudgetEvent> {
        let paused =
            state.manual_pause || percent_used(state) >= self.config.pause_threshold_pct;

        if paused == state.notified_paused {
            return None;
        }

        state.notified_paused = paused;
        Some(if paused { BudgetEvent::Paused } else { BudgetEvent::Resumed })
    }

    fn fire(&self, event: Option<BudgetEvent>) {
        let Some(event) = event else {
            return;
        };

        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Budget listener registry lock poisoned");
                poisoned.into_inner()
            }
        };

        debug!(?event, listeners = listeners.len(), "Firing budget event");
        for listener in listeners.values() {
            listener(event);
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, BudgetState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Budget state lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, BudgetState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Budget state lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<C: Clock + Clone> Clone for BudgetTracker<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            config: self.config.clone(),
            listeners: Arc::clone(&self.listeners),
            next_listener_id: Arc::clone(&self.next_listener_id),
            clock: self.clock.clone(),
        }
    }
}

fn percent_used(state: &BudgetState) -> f64 {
    if state.points_max <= 0.0 {
        0.0
    } else {
        state.points_used / state.points_max * 100.0
    }
}
