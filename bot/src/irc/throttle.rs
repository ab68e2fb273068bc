use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket pacing outbound JOIN commands so the network's join rate
/// limit is never hit. Callers wait for a token instead of being refused.
pub struct JoinThrottle {
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
        }
    }
}

impl JoinThrottle {
    /// Allow a burst of `max_per_window`, refilling fully over `window`.
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        let max_tokens = f64::from(max_per_window.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                max_tokens,
                refill_rate: max_tokens / window.as_secs_f64().max(0.001),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a join may be sent. Waiters are served in order.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        while let Err(wait) = bucket.take(Instant::now()) {
            tokio::time::sleep(wait).await;
        }
    }
}
