// Rate guard - sliding-window request counting per user.
//
// State is in-memory and process-lifetime. The rate violation counter is
// independent from the ledger's moderation violations: it never expires and
// never leads to a ban, it only escalates the warning text.

use dashmap::DashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Rate-limit category applied to a user class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateTier {
    Default,
    Admin,
    NewUser,
}

impl fmt::Display for RateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateTier::Default => "default",
            RateTier::Admin => "admin",
            RateTier::NewUser => "new_user",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub interval: Duration,
}

impl RateLimit {
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            interval: Duration::from_secs(60),
        }
    }
}

/// Limits for every tier.
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub default: RateLimit,
    pub admin: RateLimit,
    pub new_user: RateLimit,
}

impl RateLimits {
    pub fn for_tier(&self, tier: RateTier) -> RateLimit {
        match tier {
            RateTier::Default => self.default,
            RateTier::Admin => self.admin,
            RateTier::NewUser => self.new_user,
        }
    }

    /// Widest interval of all tiers, used for stats.
    fn widest_interval(&self) -> Duration {
        self.default
            .interval
            .max(self.admin.interval)
            .max(self.new_user.interval)
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            default: RateLimit::per_minute(20),
            admin: RateLimit::per_minute(100),
            new_user: RateLimit::per_minute(10),
        }
    }
}

/// Result of a limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the oldest counted request leaves the window. Only set
    /// when the request was refused.
    pub seconds_to_reset: Option<f64>,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            seconds_to_reset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateStats {
    pub requests_in_window: usize,
    pub violations: u32,
    pub last_request: Option<Instant>,
}

#[derive(Debug, Default)]
struct RateState {
    /// (timestamp, weight) pairs, oldest first
    requests: Vec<(Instant, u32)>,
    violations: u32,
}

impl RateState {
    fn prune(&mut self, now: Instant, interval: Duration) {
        self.requests
            .retain(|(at, _)| now.saturating_duration_since(*at) < interval);
    }

    fn total(&self) -> u32 {
        self.requests.iter().map(|(_, count)| *count).sum()
    }

    fn record(&mut self, now: Instant) {
        self.requests.push((now, 1));
    }

    /// Prune the window and compare what is left against `limit`.
    fn decide(&mut self, limit: RateLimit, now: Instant) -> RateDecision {
        self.prune(now, limit.interval);
        if self.total() < limit.max_requests {
            return RateDecision::allowed();
        }

        let oldest = self
            .requests
            .iter()
            .map(|(at, _)| *at)
            .min()
            .unwrap_or(now);
        let elapsed = now.saturating_duration_since(oldest);
        RateDecision {
            allowed: false,
            seconds_to_reset: Some(limit.interval.saturating_sub(elapsed).as_secs_f64()),
        }
    }
}

pub struct RateGuard {
    limits: RateLimits,
    state: DashMap<u64, RateState>,
}

impl RateGuard {
    pub fn new(limits: RateLimits) -> Self {
        tracing::info!(
            default = limits.default.max_requests,
            admin = limits.admin.max_requests,
            new_user = limits.new_user.max_requests,
            "Rate guard initialised"
        );
        Self {
            limits,
            state: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Would one more request from this user fit in the tier's window?
    /// Does not count the request.
    pub fn check_limit(&self, user_id: u64, tier: RateTier) -> RateDecision {
        self.check_limit_at(user_id, tier, Instant::now())
    }

    pub fn check_limit_at(&self, user_id: u64, tier: RateTier, now: Instant) -> RateDecision {
        let limit = self.limits.for_tier(tier);
        let mut state = self.state.entry(user_id).or_default();
        let decision = state.decide(limit, now);
        drop(state);

        if !decision.allowed {
            tracing::debug!(user_id, tier = %tier, "Rate limit reached");
        }
        decision
    }

    /// Check the limit and, if the request fits, count it. Both happen under
    /// the same entry lock, so concurrent requests cannot overshoot the limit.
    pub fn try_admit(&self, user_id: u64, tier: RateTier) -> RateDecision {
        self.try_admit_at(user_id, tier, Instant::now())
    }

    pub fn try_admit_at(&self, user_id: u64, tier: RateTier, now: Instant) -> RateDecision {
        let limit = self.limits.for_tier(tier);
        let mut state = self.state.entry(user_id).or_default();
        let decision = state.decide(limit, now);
        if decision.allowed {
            state.record(now);
        }
        drop(state);

        if decision.allowed {
            tracing::debug!(user_id, "Request recorded");
        } else {
            tracing::debug!(user_id, tier = %tier, "Rate limit reached");
        }
        decision
    }

    /// Count one more rate violation and return the running total.
    pub fn add_violation(&self, user_id: u64) -> u32 {
        let mut state = self.state.entry(user_id).or_default();
        state.violations += 1;
        let count = state.violations;
        drop(state);

        tracing::warn!(user_id, count, "Rate violation recorded");
        count
    }

    pub fn reset_violations(&self, user_id: u64) {
        if let Some(mut state) = self.state.get_mut(&user_id) {
            if state.violations > 0 {
                state.violations = 0;
                drop(state);
                tracing::info!(user_id, "Rate violations reset");
            }
        }
    }

    pub fn user_stats(&self, user_id: u64) -> RateStats {
        self.user_stats_at(user_id, Instant::now())
    }

    pub fn user_stats_at(&self, user_id: u64, now: Instant) -> RateStats {
        let interval = self.limits.widest_interval();
        match self.state.get_mut(&user_id) {
            Some(mut state) => {
                state.prune(now, interval);
                RateStats {
                    requests_in_window: state.requests.len(),
                    violations: state.violations,
                    last_request: state.requests.iter().map(|(at, _)| *at).max(),
                }
            }
            None => RateStats {
                requests_in_window: 0,
                violations: 0,
                last_request: None,
            },
        }
    }
}

impl Default for RateGuard {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admit(guard: &RateGuard, user_id: u64, tier: RateTier, now: Instant) -> RateDecision {
        guard.try_admit_at(user_id, tier, now)
    }

    fn record(guard: &RateGuard, user_id: u64, now: Instant) {
        guard.state.entry(user_id).or_default().record(now);
    }

    #[test]
    fn test_twenty_first_request_is_refused() {
        let guard = RateGuard::default();
        let start = Instant::now();

        for i in 0..20 {
            let at = start + Duration::from_secs(i);
            assert!(admit(&guard, 1, RateTier::Default, at).allowed, "request {}", i + 1);
        }

        let decision = admit(&guard, 1, RateTier::Default, start + Duration::from_secs(20));
        assert!(!decision.allowed);
        let reset = decision.seconds_to_reset.unwrap();
        assert!(reset > 0.0);
        assert!((reset - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_slides() {
        let guard = RateGuard::default();
        let start = Instant::now();
        for _ in 0..10 {
            admit(&guard, 2, RateTier::NewUser, start);
        }
        assert!(!guard.check_limit_at(2, RateTier::NewUser, start).allowed);

        let later = start + Duration::from_secs(61);
        assert!(guard.check_limit_at(2, RateTier::NewUser, later).allowed);
    }

    #[test]
    fn test_tiers_have_separate_limits() {
        let guard = RateGuard::default();
        let now = Instant::now();
        for _ in 0..20 {
            record(&guard, 3, now);
        }

        assert!(!guard.check_limit_at(3, RateTier::Default, now).allowed);
        assert!(guard.check_limit_at(3, RateTier::Admin, now).allowed);
    }

    #[test]
    fn test_check_does_not_count_request() {
        let guard = RateGuard::default();
        let now = Instant::now();
        for _ in 0..50 {
            guard.check_limit_at(4, RateTier::Default, now);
        }
        assert_eq!(guard.user_stats_at(4, now).requests_in_window, 0);
    }

    #[test]
    fn test_violations_accumulate_until_reset() {
        let guard = RateGuard::default();
        assert_eq!(guard.add_violation(5), 1);
        assert_eq!(guard.add_violation(5), 2);
        assert_eq!(guard.user_stats(5).violations, 2);

        guard.reset_violations(5);
        assert_eq!(guard.user_stats(5).violations, 0);
        assert_eq!(guard.add_violation(5), 1);
    }

    #[test]
    fn test_user_stats() {
        let guard = RateGuard::default();
        let start = Instant::now();
        record(&guard, 6, start);
        record(&guard, 6, start + Duration::from_secs(5));

        let stats = guard.user_stats_at(6, start + Duration::from_secs(10));
        assert_eq!(stats.requests_in_window, 2);
        assert_eq!(stats.last_request, Some(start + Duration::from_secs(5)));

        let unknown = guard.user_stats(999);
        assert_eq!(unknown.requests_in_window, 0);
        assert_eq!(unknown.last_request, None);
    }

    #[test]
    fn test_refused_requests_are_not_counted() {
        let guard = RateGuard::default();
        let now = Instant::now();
        for _ in 0..30 {
            admit(&guard, 7, RateTier::NewUser, now);
        }
        assert_eq!(guard.user_stats_at(7, now).requests_in_window, 10);
    }

    #[test]
    fn test_concurrent_admission_stops_at_limit() {
        let guard = std::sync::Arc::new(RateGuard::default());
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = std::sync::Arc::clone(&guard);
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| guard.try_admit_at(8, RateTier::Default, now).allowed)
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 20);
        assert_eq!(guard.user_stats_at(8, now).requests_in_window, 20);
    }
}
