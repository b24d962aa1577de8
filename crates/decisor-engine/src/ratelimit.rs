//! Per-(workspace, tool) token buckets.
//!
//! Capacity and refill rate both equal the manifest's `max_rps_per_workspace`.
//! Acquisition is a single short critical section; counters may drift under
//! contention, which the thresholds tolerate.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Process-wide token-bucket table.
#[derive(Default)]
pub struct TokenBuckets {
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl TokenBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take one token for (workspace, tool) at the given refill rate.
    /// A rate of zero means the tool is unthrottled.
    pub fn try_acquire(&self, workspace_id: &str, tool: &str, rate_per_sec: u32) -> bool {
        if rate_per_sec == 0 {
            return true;
        }
        let now = Instant::now();
        let capacity = rate_per_sec as f64;
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry((workspace_id.to_string(), tool.to_string()))
            .or_insert(Bucket {
                tokens: capacity,
                last_refill: now,
            });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * capacity).min(capacity);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
