use std::time::Duration;

use rand::Rng;

/// Exponential backoff with multiplicative jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter_pct: f64,
}

/// Backoff between account attempts inside the dispatch loop.
pub const REQUEST_BACKOFF: BackoffConfig = BackoffConfig {
    initial: Duration::from_secs(1),
    max: Duration::from_secs(10),
    multiplier: 2.0,
    jitter_pct: 0.3,
};

/// Backoff for guest token acquisition retries.
pub const GUEST_TOKEN_BACKOFF: BackoffConfig = BackoffConfig {
    initial: Duration::from_secs(2),
    max: Duration::from_secs(60),
    multiplier: 2.0,
    jitter_pct: 0.3,
};

impl BackoffConfig {
    /// Wait duration for the given zero-based attempt number.
    pub fn duration(&self, attempt: u32) -> Duration {
        let capped = (self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32))
            .min(self.max.as_secs_f64());
        let jittered = if self.jitter_pct > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter_pct..=self.jitter_pct);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Small cooperative delay applied before the first attempt of every request,
/// so bursts of calls do not land in lockstep.
pub async fn request_jitter() {
    let ms = rand::thread_rng().gen_range(50..250);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
