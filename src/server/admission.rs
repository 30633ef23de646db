//! Admission control
//!
//! Two gates checked at accept time: a token bucket limiting the rate of
//! new sessions and an atomic gauge capping concurrent sessions. Both
//! rejections drop the connection without sending any SOCKS5 bytes.

use crate::config::LimitsConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Why a connection was refused admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// The token bucket is empty
    RateLimited,
    /// The concurrency cap is reached
    AtCapacity,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::RateLimited => f.write_str("rate limited"),
            AdmissionError::AtCapacity => f.write_str("at capacity"),
        }
    }
}

/// Token bucket with lazy, time-driven refill.
///
/// Refill happens on the taking path: elapsed time since the last refill
/// is converted to whole tokens and the remainder carries over, so the
/// average rate holds regardless of how bursty the callers are.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    interval: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket starting full.
    ///
    /// A zero interval is clamped to one millisecond so refill arithmetic
    /// stays defined.
    pub fn new(capacity: u32, interval: Duration) -> Self {
        TokenBucket {
            capacity,
            interval: interval.max(Duration::from_millis(1)),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token; `false` means the caller must drop the connection.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("token bucket lock poisoned");

        let elapsed = state.last_refill.elapsed();
        let refilled = (elapsed.as_nanos() / self.interval.as_nanos()) as u32;
        if refilled > 0 {
            state.tokens = state.tokens.saturating_add(refilled).min(self.capacity);
            // Carry the fractional interval over instead of resetting it.
            state.last_refill += self.interval * refilled;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (refill not applied)
    #[cfg(test)]
    fn available(&self) -> u32 {
        self.state.lock().expect("token bucket lock poisoned").tokens
    }
}

/// Concurrent-session gauge with RAII permits.
///
/// The permit decrements the count on drop, so the gauge returns to its
/// pre-session value on every exit path, panics included.
#[derive(Debug)]
pub struct ConnectionGauge {
    active: Arc<AtomicUsize>,
    max: usize,
}

impl ConnectionGauge {
    /// Create a gauge with the given cap
    pub fn new(max: usize) -> Self {
        ConnectionGauge {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Reserve a slot, or `None` when the cap would be exceeded
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ConnectionPermit {
                        active: self.active.clone(),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Number of live permits
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// A reserved session slot; dropping it releases the slot
#[derive(Debug)]
pub struct ConnectionPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Both admission gates behind one check
#[derive(Debug)]
pub struct Admission {
    bucket: TokenBucket,
    gauge: ConnectionGauge,
}

impl Admission {
    /// Build the gates from the configured limits
    pub fn new(limits: &LimitsConfig) -> Self {
        Admission {
            bucket: TokenBucket::new(limits.rate_burst, limits.rate_interval()),
            gauge: ConnectionGauge::new(limits.max_connections),
        }
    }

    /// Run both gates; the rate limiter is consulted first
    pub fn admit(&self) -> Result<ConnectionPermit, AdmissionError> {
        if !self.bucket.try_acquire() {
            return Err(AdmissionError::RateLimited);
        }
        self.gauge.try_acquire().ok_or(AdmissionError::AtCapacity)
    }

    /// Number of admitted sessions still alive
    pub fn active_sessions(&self) -> usize {
        self.gauge.active()
    }
}
