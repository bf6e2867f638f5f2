//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the application context.
//!
//! Config is used in three ways:
//! 1. **App creation**: `App::builder(config)`
//! 2. **Wrapper defaults**: retry interval, parameter masking
//! 3. **Lifecycle defaults**: tick interval when a module declares none
//!
//! ## Sentinel values
//! - `bus_capacity = 0` → clamped to 1
//! - `log_batch_size = 0` → clamped to 1
//! - `log_flush_interval = 0s` → background flush disabled

use std::time::Duration;

/// Global configuration for the application context.
///
/// ## Field semantics
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `default_tick_interval`: Interval between `onTick` runs when the module declares none
/// - `default_retry_interval`: Pause used by `RetryOnNetworkConnectionError::default()`
/// - `masked_keywords`: Payload keys whose values are hidden in logs
/// - `log_flush_interval`: How often collected log entries are shipped (`0s` = never)
/// - `log_batch_size`: Max entries shipped per flush
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow receivers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Interval between two `onTick` runs of an attached module.
    pub default_tick_interval: Duration,

    /// Pause between two attempts of a connectivity-failing handler.
    pub default_retry_interval: Duration,

    /// Object keys (case-insensitive substring match) whose values are masked
    /// before handler parameters are logged.
    pub masked_keywords: Vec<String>,

    /// Replacement text for masked values.
    pub mask_placeholder: String,

    /// Period of the background log flush loop.
    pub log_flush_interval: Duration,

    /// Maximum number of entries handed to the log sink per flush.
    pub log_batch_size: usize,

    /// Capacity of each subscriber's queue.
    pub log_queue_capacity: usize,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the flush batch size clamped to a minimum of 1.
    #[inline]
    pub fn log_batch_size_clamped(&self) -> usize {
        self.log_batch_size.max(1)
    }

    /// Returns the flush period as an `Option`.
    ///
    /// - `None` → no background flush
    /// - `Some(d)` → flush every `d`
    #[inline]
    pub fn flush_interval(&self) -> Option<Duration> {
        if self.log_flush_interval == Duration::ZERO {
            None
        } else {
            Some(self.log_flush_interval)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `default_tick_interval = 5s`
    /// - `default_retry_interval = 3s`
    /// - `masked_keywords = []`, `mask_placeholder = "***"`
    /// - `log_flush_interval = 15s`, `log_batch_size = 200`
    /// - `log_queue_capacity = 1024`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            default_tick_interval: Duration::from_secs(5),
            default_retry_interval: Duration::from_secs(3),
            masked_keywords: Vec::new(),
            mask_placeholder: "***".to_string(),
            log_flush_interval: Duration::from_secs(15),
            log_batch_size: 200,
            log_queue_capacity: 1024,
        }
    }
}
