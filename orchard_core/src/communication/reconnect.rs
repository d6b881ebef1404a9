/// Retry policy for acquiring a backend connection
///
/// The mesh favours availability: by default acquisition never gives up and
/// waits a fixed short backoff between attempts.
use std::time::Duration;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Reconnection strategy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectStrategy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 1.0 keeps the backoff fixed
    pub multiplier: f64,
    pub max_retries: usize, // 0 = infinite
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self::fixed(DEFAULT_BACKOFF)
    }
}

impl ReconnectStrategy {
    /// Same delay before every attempt, never give up
    pub fn fixed(backoff: Duration) -> Self {
        Self {
            initial_backoff: backoff,
            max_backoff: backoff,
            multiplier: 1.0,
            max_retries: 0,
        }
    }

    /// Create a strategy for testing (short backoffs, limited retries)
    pub fn testing() -> Self {
        Self {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2.0,
            max_retries: 3,
        }
    }

    /// Calculate backoff delay for the given attempt
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi((attempt - 1).min(i32::MAX as usize) as i32);

        Duration::from_millis(delay_ms as u64).min(self.max_backoff)
    }

    /// Check if we should retry after this many attempts
    pub fn should_retry(&self, attempt: usize) -> bool {
        self.max_retries == 0 || attempt < self.max_retries
    }
}

/// Connection state tracker for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionHealth {
    Connected,
    Reconnecting { attempt: usize },
    Failed { attempts: usize },
}

/// Reconnection context that tracks state
#[derive(Debug, Clone)]
pub struct ReconnectContext {
    pub strategy: ReconnectStrategy,
    pub attempt: usize,
    pub health: ConnectionHealth,
}

impl ReconnectContext {
    pub fn new(strategy: ReconnectStrategy) -> Self {
        Self {
            strategy,
            attempt: 0,
            health: ConnectionHealth::Connected,
        }
    }

    /// Start a reconnection attempt
    pub fn begin_reconnect(&mut self) {
        self.attempt += 1;
        self.health = ConnectionHealth::Reconnecting {
            attempt: self.attempt,
        };
    }

    /// Mark connection as successful (resets attempt counter)
    pub fn mark_connected(&mut self) {
        self.attempt = 0;
        self.health = ConnectionHealth::Connected;
    }

    pub fn mark_failed(&mut self) {
        self.health = ConnectionHealth::Failed {
            attempts: self.attempt,
        };
    }

    pub fn backoff_delay(&self) -> Duration {
        self.strategy.backoff_delay(self.attempt)
    }

    pub fn should_retry(&self) -> bool {
        self.strategy.should_retry(self.attempt)
    }

    /// Wait for the backoff period
    pub async fn wait_backoff(&self) {
        let delay = self.backoff_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_and_unbounded() {
        let strategy = ReconnectStrategy::default();
        assert_eq!(strategy.backoff_delay(1), DEFAULT_BACKOFF);
        assert_eq!(strategy.backoff_delay(50), DEFAULT_BACKOFF);
        assert!(strategy.should_retry(10_000));
    }

    #[test]
    fn test_backoff_increases_and_caps() {
        let strategy = ReconnectStrategy::testing();
        assert!(strategy.backoff_delay(2) > strategy.backoff_delay(1));
        assert_eq!(strategy.backoff_delay(100), Duration::from_millis(10));
    }

    #[test]
    fn test_max_retries() {
        let strategy = ReconnectStrategy::testing();
        assert!(strategy.should_retry(2));
        assert!(!strategy.should_retry(3));
    }

    #[test]
    fn test_context_state_transitions() {
        let mut ctx = ReconnectContext::new(ReconnectStrategy::testing());
        assert_eq!(ctx.health, ConnectionHealth::Connected);

        ctx.begin_reconnect();
        assert_eq!(ctx.health, ConnectionHealth::Reconnecting { attempt: 1 });

        ctx.mark_connected();
        assert_eq!(ctx.health, ConnectionHealth::Connected);
        assert_eq!(ctx.attempt, 0);

        ctx.begin_reconnect();
        ctx.mark_failed();
        assert_eq!(ctx.health, ConnectionHealth::Failed { attempts: 1 });
    }
}
