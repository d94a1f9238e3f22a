use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::RateLimitRule;

struct Window {
    start: Instant,
    count: u32,
}

/// One active rule and its per-identifier windows.
struct RateGate {
    rule: RateLimitRule,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateGate {
    /// Fixed-window decision: once the window is older than the rule's
    /// span, the counter restarts at 1; otherwise the request is rejected
    /// when the recorded count has already reached `max_requests`.
    ///
    /// Returns the `Retry-After` value on rejection.
    async fn check(&self, identifier: &str) -> Result<(), u64> {
        let retry_after = self.rule.seconds.ceil() as u64;
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        match windows.get_mut(identifier) {
            Some(window) if now.duration_since(window.start).as_secs_f64() > self.rule.seconds => {
                window.start = now;
                window.count = 1;
                Ok(())
            }
            Some(window) if window.count >= self.rule.max_requests => Err(retry_after),
            Some(window) => {
                window.count += 1;
                Ok(())
            }
            None => {
                windows.insert(
                    identifier.to_string(),
                    Window {
                        start: now,
                        count: 1,
                    },
                );
                Ok(())
            }
        }
    }
}

/// Sliding-window request caps keyed by (client identifier, path). Rules
/// are applied in configured order; the first to reject ends the request.
pub struct RateLimiter {
    gates: Vec<RateGate>,
}

impl RateLimiter {
    pub fn new(rules: &[RateLimitRule]) -> Self {
        Self {
            gates: rules
                .iter()
                .map(|&rule| RateGate {
                    rule,
                    windows: Mutex::new(HashMap::new()),
                })
                .collect(),
        }
    }

    /// Check every active gate. `Err` carries the `Retry-After` seconds of
    /// the rule that tripped.
    pub async fn check(&self, identifier: &str) -> Result<(), u64> {
        for gate in &self.gates {
            if let Err(retry_after) = gate.check(identifier).await {
                warn!("Too many attempts from {identifier}");
                return Err(retry_after);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, seconds: f64) -> RateLimiter {
        RateLimiter::new(&[RateLimitRule {
            max_requests,
            seconds,
        }])
    }

    #[tokio::test]
    async fn test_exactly_max_requests_is_first_rejected() {
        let limiter = limiter(3, 60.0);
        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4/api/ping").await.is_ok());
        }
        assert_eq!(limiter.check("1.2.3.4/api/ping").await, Err(60));
    }

    #[tokio::test]
    async fn test_retry_after_is_ceiled() {
        let limiter = limiter(1, 0.5);
        assert!(limiter.check("a").await.is_ok());
        assert_eq!(limiter.check("a").await, Err(1));
    }

    #[tokio::test]
    async fn test_identifiers_have_independent_budgets() {
        let limiter = limiter(1, 60.0);
        assert!(limiter.check("1.2.3.4/api/ping").await.is_ok());
        assert!(limiter.check("1.2.3.4/api/resources").await.is_ok());
        assert!(limiter.check("5.6.7.8/api/ping").await.is_ok());
        assert!(limiter.check("1.2.3.4/api/ping").await.is_err());
    }

    #[tokio::test]
    async fn test_window_expiry_resets_counter() {
        let limiter = limiter(2, 0.02);
        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("a").await.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(limiter.check("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_first_rule_to_reject_wins() {
        let limiter = RateLimiter::new(&[
            RateLimitRule {
                max_requests: 1,
                seconds: 10.0,
            },
            RateLimitRule {
                max_requests: 100,
                seconds: 60.0,
            },
        ]);
        assert!(limiter.check("a").await.is_ok());
        assert_eq!(limiter.check("a").await, Err(10));
    }

    #[tokio::test]
    async fn test_no_rules_always_allows() {
        let limiter = RateLimiter::new(&[]);
        for _ in 0..100 {
            assert!(limiter.check("a").await.is_ok());
        }
    }
}
