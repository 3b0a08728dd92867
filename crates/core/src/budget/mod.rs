//! Upstream quota budget tracking
//!
//! Single source of truth for "how much upstream capacity remains this
//! hour", shared by live (user-triggered) and background (queue-driven)
//! consumers. Background work pauses at a configurable usage threshold so
//! headroom remains for live traffic; pause/resume transitions are pushed to
//! subscribers instead of being polled.

mod tracker;

pub use tracker::{
    BudgetConfig, BudgetConfigBuilder, BudgetEvent, BudgetSnapshot, BudgetTracker, ListenerId,
};
