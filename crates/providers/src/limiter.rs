//! Adaptive per-provider admission control.
//!
//! Each provider gets a fixed number of slots; a slot admits one call at a
//! time and enforces a minimum spacing between its calls. The spacing adapts
//! to observed outcomes: consecutive successes shrink it toward a floor,
//! rate-limit failures double it and push every slot past a shared cooldown.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const MAX_INTERVAL_RATE_LIMITED: Duration = Duration::from_secs(30);
const MAX_INTERVAL_TRANSIENT: Duration = Duration::from_secs(15);
const TRANSIENT_COOLDOWN: Duration = Duration::from_secs(5);
const MAX_COOLDOWN_SECS: u64 = 60;
const SUCCESSES_BEFORE_SHRINK: u32 = 2;

/// Static quota description for one provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub slot_count: usize,
    pub default_interval: Duration,
    pub floor_interval: Duration,
}

impl ProviderProfile {
    pub fn new(slot_count: usize, default_interval: Duration, floor_interval: Duration) -> Self {
        // The limiter never accelerates below half the default spacing.
        let floor = floor_interval.max(default_interval / 2);
        Self {
            slot_count: slot_count.max(1),
            default_interval,
            floor_interval: floor,
        }
    }
}

impl Default for ProviderProfile {
    fn default() -> Self {
        ProviderProfile::new(3, Duration::from_secs(1), Duration::from_millis(500))
    }
}

struct ProviderState {
    min_interval: Duration,
    floor: Duration,
    slots: Vec<Instant>,
    consecutive_successes: u32,
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
}

impl ProviderState {
    fn from_profile(profile: &ProviderProfile, now: Instant) -> Self {
        Self {
            min_interval: profile.default_interval,
            floor: profile.floor_interval,
            slots: vec![now; profile.slot_count],
            consecutive_successes: 0,
            consecutive_failures: 0,
            backoff_until: None,
        }
    }
}

/// Admission control for outbound classifier calls.
///
/// Explicitly constructed and injected; all mutation goes through `acquire`,
/// `record_success` and `record_failure`. The internal lock is never held
/// across a sleep.
pub struct RateLimiter {
    profiles: HashMap<String, ProviderProfile>,
    default_profile: ProviderProfile,
    states: Mutex<HashMap<String, ProviderState>>,
}

impl RateLimiter {
    pub fn new(profiles: HashMap<String, ProviderProfile>) -> Self {
        Self {
            profiles,
            default_profile: ProviderProfile::default(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn profile_for(&self, provider: &str) -> &ProviderProfile {
        self.profiles.get(provider).unwrap_or(&self.default_profile)
    }

    /// Wait until this provider may make one more call.
    ///
    /// Picks the slot with the earliest next-available instant, reserves it
    /// before sleeping so concurrent callers never race onto the same slot,
    /// then sleeps out the remaining wait. An active provider-wide backoff is
    /// waited out in full before slot selection.
    pub async fn acquire(&self, provider: &str) {
        loop {
            let wake_at = {
                let mut states = self.states.lock().await;
                let now = Instant::now();
                let state = states.entry(provider.to_string()).or_insert_with(|| {
                    ProviderState::from_profile(self.profile_for(provider), now)
                });

                if let Some(backoff) = state.backoff_until {
                    if backoff > now {
                        WakePlan::Backoff(backoff)
                    } else {
                        state.backoff_until = None;
                        reserve_slot(state, now)
                    }
                } else {
                    reserve_slot(state, now)
                }
            };

            match wake_at {
                WakePlan::Backoff(deadline) => {
                    debug!(provider, "waiting out provider backoff");
                    tokio::time::sleep_until(deadline).await;
                    // Re-check: another failure may have extended the window.
                }
                WakePlan::Slot(start) => {
                    tokio::time::sleep_until(start).await;
                    return;
                }
            }
        }
    }

    /// Report a completed call. Two consecutive successes shrink the spacing
    /// by 15%, floored at the provider's minimum; any success clears the
    /// failure streak and any active backoff.
    pub async fn record_success(&self, provider: &str, duration: Duration) {
        let mut states = self.states.lock().await;
        let Some(state) = states.get_mut(provider) else {
            return;
        };
        state.consecutive_failures = 0;
        state.backoff_until = None;
        state.consecutive_successes += 1;
        if state.consecutive_successes >= SUCCESSES_BEFORE_SHRINK {
            state.consecutive_successes = 0;
            let shrunk = Duration::from_secs_f64(state.min_interval.as_secs_f64() * 0.85);
            state.min_interval = shrunk.max(state.floor);
            debug!(
                provider,
                interval_ms = state.min_interval.as_millis() as u64,
                call_ms = duration.as_millis() as u64,
                "rate limiter accelerated"
            );
        }
    }

    /// Report a failed call.
    ///
    /// Rate-limit signals double the spacing (capped at 30s) and impose an
    /// exponential cooldown that pushes every slot past the window, so the
    /// retries do not stampede into the same wall. Transient server errors
    /// grow the spacing by 1.5x (capped at 15s) with a flat 5s cooldown and
    /// no slot-wide push.
    pub async fn record_failure(&self, provider: &str, is_rate_limited: bool) {
        let mut states = self.states.lock().await;
        let now = Instant::now();
        let state = states
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::from_profile(self.profile_for(provider), now));

        state.consecutive_successes = 0;
        state.consecutive_failures += 1;

        if is_rate_limited {
            state.min_interval = (state.min_interval * 2).min(MAX_INTERVAL_RATE_LIMITED);
            let exponent = state.consecutive_failures.min(6);
            let cooldown_secs = (1u64 << exponent).min(MAX_COOLDOWN_SECS);
            let cooldown = Duration::from_secs(cooldown_secs);
            let boundary = now + cooldown;
            state.backoff_until = Some(boundary);
            for slot in &mut state.slots {
                if *slot < boundary {
                    *slot = boundary;
                }
            }
            warn!(
                provider,
                cooldown_secs,
                interval_ms = state.min_interval.as_millis() as u64,
                "rate limited, backing off"
            );
        } else {
            let grown = Duration::from_secs_f64(state.min_interval.as_secs_f64() * 1.5);
            state.min_interval = grown.min(MAX_INTERVAL_TRANSIENT);
            state.backoff_until = Some(now + TRANSIENT_COOLDOWN);
            warn!(
                provider,
                interval_ms = state.min_interval.as_millis() as u64,
                "transient provider failure, slowing down"
            );
        }
    }

    /// Current spacing for a provider, if it has been used.
    pub async fn current_interval(&self, provider: &str) -> Option<Duration> {
        let states = self.states.lock().await;
        states.get(provider).map(|s| s.min_interval)
    }
}

enum WakePlan {
    Backoff(Instant),
    Slot(Instant),
}

fn reserve_slot(state: &mut ProviderState, now: Instant) -> WakePlan {
    let mut idx = 0;
    for i in 1..state.slots.len() {
        if state.slots[i] < state.slots[idx] {
            idx = i;
        }
    }
    let start = state.slots[idx].max(now);
    state.slots[idx] = start + state.min_interval;
    WakePlan::Slot(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn limiter_with(slots: usize, interval_ms: u64, floor_ms: u64) -> RateLimiter {
        let mut profiles = HashMap::new();
        profiles.insert(
            "p".to_string(),
            ProviderProfile::new(
                slots,
                Duration::from_millis(interval_ms),
                Duration::from_millis(floor_ms),
            ),
        );
        RateLimiter::new(profiles)
    }

    #[tokio::test(start_paused = true)]
    async fn single_slot_spaces_calls_by_min_interval() {
        let limiter = limiter_with(1, 1000, 500);
        let t0 = Instant::now();
        limiter.acquire("p").await;
        limiter.acquire("p").await;
        limiter.acquire("p").await;
        assert!(t0.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn slots_admit_parallel_calls_without_extra_wait() {
        let limiter = limiter_with(3, 1000, 500);
        let t0 = Instant::now();
        limiter.acquire("p").await;
        limiter.acquire("p").await;
        limiter.acquire("p").await;
        // Three slots, three immediate admissions.
        assert!(t0.elapsed() < Duration::from_millis(10));
        limiter.acquire("p").await;
        assert!(t0.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_share_a_slot_window() {
        let limiter = Arc::new(limiter_with(1, 200, 100));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire("p").await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap());
        }
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_successes_shrink_interval_until_floor() {
        let limiter = limiter_with(1, 1000, 600);
        limiter.acquire("p").await;
        let mut last = limiter.current_interval("p").await.unwrap();
        for _ in 0..20 {
            limiter.record_success("p", Duration::from_millis(50)).await;
            limiter.record_success("p", Duration::from_millis(50)).await;
            let now = limiter.current_interval("p").await.unwrap();
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn one_success_alone_does_not_shrink() {
        let limiter = limiter_with(1, 1000, 500);
        limiter.acquire("p").await;
        limiter.record_success("p", Duration::from_millis(10)).await;
        assert_eq!(
            limiter.current_interval("p").await.unwrap(),
            Duration::from_millis(1000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_failure_doubles_interval_and_blocks_acquire() {
        let limiter = limiter_with(2, 1000, 500);
        limiter.acquire("p").await;
        limiter.record_failure("p", true).await;
        assert_eq!(
            limiter.current_interval("p").await.unwrap(),
            Duration::from_millis(2000)
        );
        // First failure: cooldown 2^1 = 2s; even the free second slot waits.
        let t0 = Instant::now();
        limiter.acquire("p").await;
        assert!(t0.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_growth_is_capped() {
        let limiter = limiter_with(1, 1000, 500);
        limiter.acquire("p").await;
        for _ in 0..10 {
            limiter.record_failure("p", true).await;
        }
        assert_eq!(
            limiter.current_interval("p").await.unwrap(),
            Duration::from_secs(30)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_applies_flat_cooldown() {
        let limiter = limiter_with(1, 1000, 500);
        limiter.acquire("p").await;
        limiter.record_failure("p", false).await;
        assert_eq!(
            limiter.current_interval("p").await.unwrap(),
            Duration::from_millis(1500)
        );
        let t0 = Instant::now();
        limiter.acquire("p").await;
        assert!(t0.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_active_backoff() {
        let limiter = limiter_with(1, 100, 50);
        limiter.acquire("p").await;
        // Transient failure: flat 5s backoff, no slot push.
        limiter.record_failure("p", false).await;
        limiter.record_success("p", Duration::from_millis(10)).await;
        let t0 = Instant::now();
        limiter.acquire("p").await;
        // Only the per-slot spacing remains, not the 5s window.
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_streak() {
        let limiter = limiter_with(1, 100, 50);
        limiter.acquire("p").await;
        limiter.record_failure("p", true).await;
        limiter.record_success("p", Duration::from_millis(10)).await;
        // Streak restarted: this failure is the first again, cooldown 2^1.
        limiter.record_failure("p", true).await;
        let t0 = Instant::now();
        limiter.acquire("p").await;
        let waited = t0.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn providers_do_not_interfere() {
        let limiter = limiter_with(1, 1000, 500);
        limiter.acquire("p").await;
        limiter.record_failure("p", true).await;
        let t0 = Instant::now();
        limiter.acquire("other").await;
        assert!(t0.elapsed() < Duration::from_millis(10));
    }
}
