use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Remembers the last accepted request and turns away anything that arrives
/// sooner than `min_interval_ms` after it. Rejected attempts do not reset the window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval_ms: i64,
    last_accepted: Option<i64>,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms: i64::try_from(min_interval_ms).unwrap_or(i64::MAX),
            last_accepted: None,
        }
    }

    pub fn try_acquire(&mut self, now_ms: i64) -> bool {
        if let Some(last) = self.last_accepted {
            if now_ms.saturating_sub(last) < self.min_interval_ms {
                return false;
            }
        }
        self.last_accepted = Some(now_ms);
        true
    }

    pub fn last_accepted(&self) -> Option<i64> {
        self.last_accepted
    }
}
