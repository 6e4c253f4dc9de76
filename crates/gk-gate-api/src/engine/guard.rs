//! Per-user concurrency guard: single-flight permit plus a sliding-window
//! throttle.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Idle identities are swept once the map grows past this.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Attempts allowed per window.
    pub limit: u32,
    pub window: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            limit: 6,
            window: Duration::from_secs(60),
        }
    }
}

/// Why `admit` said no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadyInFlight,
    RateLimited { retry_after: Duration },
}

#[derive(Default)]
struct IdentityState {
    in_flight: bool,
    /// Admission times inside the current window, oldest first.
    hits: VecDeque<Instant>,
}

impl IdentityState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_idle(&self) -> bool {
        !self.in_flight && self.hits.is_empty()
    }
}

type Identities = Arc<Mutex<HashMap<String, IdentityState>>>;

fn lock(identities: &Identities) -> MutexGuard<'_, HashMap<String, IdentityState>> {
    identities.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConcurrencyGuard {
    identities: Identities,
    config: ThrottleConfig,
}

impl ConcurrencyGuard {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            identities: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Admit one attempt for `user_id`.
    ///
    /// A held permit is checked before the window, so an in-flight
    /// rejection does not consume throttle budget.
    pub fn admit(&self, user_id: &str) -> Result<Permit, Rejection> {
        let now = Instant::now();
        let window = self.config.window;
        let mut identities = lock(&self.identities);

        if identities.len() > SWEEP_THRESHOLD {
            identities.retain(|_, state| {
                state.prune(now, window);
                !state.is_idle()
            });
        }

        let state = identities.entry(user_id.to_string()).or_default();
        if state.in_flight {
            return Err(Rejection::AlreadyInFlight);
        }

        state.prune(now, window);
        if state.hits.len() >= self.config.limit as usize {
            let retry_after = state
                .hits
                .front()
                .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(window);
            return Err(Rejection::RateLimited { retry_after });
        }

        state.hits.push_back(now);
        state.in_flight = true;

        Ok(Permit {
            user_id: user_id.to_string(),
            identities: Arc::clone(&self.identities),
        })
    }

    pub fn is_in_flight(&self, user_id: &str) -> bool {
        lock(&self.identities)
            .get(user_id)
            .is_some_and(|state| state.in_flight)
    }

    pub fn tracked_identities(&self) -> usize {
        lock(&self.identities).len()
    }
}

/// Single-flight permit. Released on drop, on every exit path.
#[must_use = "dropping the permit releases it immediately"]
pub struct Permit {
    user_id: String,
    identities: Identities,
}

impl Permit {
    pub fn release(self) {}
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(state) = lock(&self.identities).get_mut(&self.user_id) {
            state.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(limit: u32, window_secs: u64) -> ConcurrencyGuard {
        ConcurrencyGuard::new(ThrottleConfig {
            limit,
            window: Duration::from_secs(window_secs),
        })
    }

    #[tokio::test]
    async fn second_attempt_while_held_is_in_flight() {
        let guard = guard(10, 60);
        let permit = guard.admit("u1").unwrap();
        assert_eq!(guard.admit("u1").err(), Some(Rejection::AlreadyInFlight));
        // Other users are unaffected.
        assert!(guard.admit("u2").is_ok());

        permit.release();
        assert!(!guard.is_in_flight("u1"));
        assert!(guard.admit("u1").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_attempt_in_window_is_rate_limited() {
        let guard = guard(3, 10);
        for _ in 0..3 {
            guard.admit("u1").unwrap().release();
            tokio::time::advance(Duration::from_millis(500)).await;
        }

        match guard.admit("u1") {
            Err(Rejection::RateLimited { retry_after }) => {
                // First hit was 1.5 s ago.
                assert_eq!(retry_after, Duration::from_millis(8500));
            }
            Err(other) => panic!("expected rate limit, got {other:?}"),
            Ok(_) => panic!("expected rate limit, got a permit"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let guard = guard(2, 10);
        guard.admit("u1").unwrap().release();
        tokio::time::advance(Duration::from_secs(6)).await;
        guard.admit("u1").unwrap().release();
        assert!(guard.admit("u1").is_err());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(guard.admit("u1").is_ok());
    }

    #[tokio::test]
    async fn in_flight_rejection_does_not_consume_budget() {
        let guard = guard(2, 60);
        let permit = guard.admit("u1").unwrap();
        for _ in 0..5 {
            assert_eq!(guard.admit("u1").err(), Some(Rejection::AlreadyInFlight));
        }
        drop(permit);
        assert!(guard.admit("u1").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_identities_are_swept_past_threshold() {
        let guard = guard(10, 10);
        let busy = guard.admit("busy").unwrap();
        for i in 0..SWEEP_THRESHOLD + 50 {
            guard.admit(&format!("user-{i}")).unwrap().release();
        }
        assert_eq!(guard.tracked_identities(), SWEEP_THRESHOLD + 51);

        // Every window expires; only the held permit keeps its identity.
        tokio::time::advance(Duration::from_secs(10)).await;
        guard.admit("late").unwrap().release();

        assert_eq!(guard.tracked_identities(), 2);
        assert!(guard.is_in_flight("busy"));
        assert_eq!(guard.admit("busy").err(), Some(Rejection::AlreadyInFlight));
        drop(busy);
    }

    #[tokio::test]
    async fn permit_released_when_task_panics() {
        let guard = Arc::new(guard(10, 60));
        let held = Arc::clone(&guard);
        let result = tokio::spawn(async move {
            let _permit = held.admit("u1").unwrap();
            panic!("attempt blew up");
        })
        .await;

        assert!(result.is_err());
        assert!(!guard.is_in_flight("u1"));
    }
}
