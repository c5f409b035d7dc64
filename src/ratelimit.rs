use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct EndpointWindow {
    remaining: u32,
    window_reset: SystemTime,
    /// Server-forced reset deadline from a 429, takes precedence over the window.
    forced_until: Option<SystemTime>,
}

/// Per-account request budget, tracked independently per endpoint name.
pub struct EndpointLimiter {
    config: Mutex<RateLimitConfig>,
    windows: DashMap<String, EndpointWindow>,
}

impl EndpointLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Mutex::new(config),
            windows: DashMap::new(),
        }
    }

    pub fn set_config(&self, config: RateLimitConfig) {
        *self.config.lock() = config;
    }

    /// Consumes one token for the endpoint. Returns false when the budget is
    /// exhausted or a server-forced deadline is still in the future.
    pub fn allow(&self, endpoint: &str) -> bool {
        let cfg = *self.config.lock();
        let now = SystemTime::now();
        let mut entry = self
            .windows
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointWindow {
                remaining: cfg.requests_per_window,
                window_reset: now + cfg.window,
                forced_until: None,
            });

        if let Some(until) = entry.forced_until {
            if now < until {
                return false;
            }
            entry.forced_until = None;
        }

        if now >= entry.window_reset {
            entry.remaining = cfg.requests_per_window;
            entry.window_reset = now + cfg.window;
        }

        if entry.remaining == 0 {
            return false;
        }
        entry.remaining -= 1;
        true
    }

    /// Applies a server-provided reset deadline (typically from
    /// `x-rate-limit-reset` after a 429).
    pub fn mark_rate_limited(&self, endpoint: &str, until: SystemTime) {
        let cfg = *self.config.lock();
        let now = SystemTime::now();
        let mut entry = self
            .windows
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointWindow {
                remaining: cfg.requests_per_window,
                window_reset: now + cfg.window,
                forced_until: None,
            });
        entry.forced_until = Some(until);
    }

    pub fn is_rate_limited(&self, endpoint: &str) -> bool {
        let now = SystemTime::now();
        match self.windows.get(endpoint) {
            Some(entry) => {
                if let Some(until) = entry.forced_until {
                    if now < until {
                        return true;
                    }
                }
                entry.remaining == 0 && now < entry.window_reset
            }
            None => false,
        }
    }

    /// Earliest instant at which `allow` could next succeed for the endpoint.
    pub fn available_at(&self, endpoint: &str) -> SystemTime {
        let now = SystemTime::now();
        let Some(entry) = self.windows.get(endpoint) else {
            return now;
        };
        let mut at = now;
        if let Some(until) = entry.forced_until {
            if until > at {
                at = until;
            }
        }
        if entry.remaining == 0 && entry.window_reset > at {
            at = entry.window_reset;
        }
        at
    }
}
