use std::time::Duration;

/// Retransmission timeout that doubles per attempt between a floor and a ceiling.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    rto: Duration,
    max_attempts: usize,
    attempts: usize,
}

impl ExponentialBackoff {
    pub fn new(min: Duration, max: Duration, max_attempts: usize) -> Self {
        let min = min.max(Duration::from_millis(1));
        Self {
            min,
            max: max.max(min),
            rto: min,
            max_attempts,
            attempts: 0,
        }
    }

    /// Start over for a new flight.
    pub fn reset(&mut self) {
        self.rto = self.min;
        self.attempts = 0;
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Record a retransmission and double the timeout, capped at the maximum.
    pub fn attempt(&mut self) {
        self.attempts += 1;
        self.rto = self.rto.saturating_mul(2).min(self.max);
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn attempts() {
        let mut exp =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), 4);

        assert_eq!(exp.rto(), Duration::from_secs(1));
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(2));
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(4));
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(5));
        assert!(exp.can_retry());
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(5));
        assert!(!exp.can_retry());

        exp.reset();
        assert_eq!(exp.rto(), Duration::from_secs(1));
        assert_eq!(exp.attempts(), 0);
    }

    #[test]
    fn max_below_min_is_raised() {
        let exp = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(1), 1);
        assert_eq!(exp.rto(), Duration::from_secs(2));
    }
}
