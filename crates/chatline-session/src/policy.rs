//! Session policy: length budget and automatic retries.

use chatline_engine::FailureKind;
use chatline_runtime::SpeedConfig;

use crate::transcript::DialogueMode;

/// Controller configuration.
///
/// ```
/// use chatline_session::SessionPolicy;
///
/// let policy = SessionPolicy::default()
///     .with_initial_max_length(512)
///     .with_growth_factor(2.0);
/// assert_eq!(policy.initial_max_length, 512);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    /// Length budget of the first session, clamped to the model's ceiling.
    pub initial_max_length: usize,
    /// Budget multiplier applied on "Maximum length exceeded".
    pub growth_factor: f64,
    /// Automatic retries allowed within one turn.
    pub max_auto_retries: usize,
    pub speed: SpeedConfig,
    pub mode: DialogueMode,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            initial_max_length: 1024,
            growth_factor: 4.0,
            max_auto_retries: 8,
            speed: SpeedConfig::default(),
            mode: DialogueMode::Chatbot,
        }
    }
}

impl SessionPolicy {
    pub fn with_initial_max_length(mut self, length: usize) -> Self {
        self.initial_max_length = length;
        self
    }

    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn with_max_auto_retries(mut self, retries: usize) -> Self {
        self.max_auto_retries = retries;
        self
    }

    pub fn with_speed(mut self, speed: SpeedConfig) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_mode(mut self, mode: DialogueMode) -> Self {
        self.mode = mode;
        self
    }

    /// First budget for a model whose ceiling is `ceiling`.
    pub fn initial_length(&self, ceiling: usize) -> usize {
        self.initial_max_length.clamp(1, ceiling.max(1))
    }

    /// Grown budget: `current * growth_factor`, capped at `ceiling`, never
    /// below `current`.
    pub fn grow(&self, current: usize, ceiling: usize) -> usize {
        let factor = if self.growth_factor.is_finite() {
            self.growth_factor.max(1.0)
        } else {
            1.0
        };
        let grown = (current as f64 * factor).ceil() as usize;
        grown.min(ceiling).max(current)
    }

    /// What to do about a failure.
    ///
    /// `failures` counts earlier failures in this turn; `retries` counts
    /// automatic retries already made.
    pub fn decide(
        &self,
        kind: FailureKind,
        current_length: usize,
        ceiling: usize,
        failures: usize,
        retries: usize,
    ) -> RetryDecision {
        if retries >= self.max_auto_retries {
            return RetryDecision::Surface;
        }
        match kind {
            FailureKind::SessionExpired => RetryDecision::Retry,
            FailureKind::LengthExceeded if current_length < ceiling => {
                RetryDecision::Grow(self.grow(current_length, ceiling))
            }
            FailureKind::Transport if failures == 0 => RetryDecision::Retry,
            _ => RetryDecision::Surface,
        }
    }
}

/// Outcome of [`SessionPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reopen with the same budget.
    Retry,
    /// Reopen with the new budget.
    Grow(usize),
    /// Give up and let the user decide.
    Surface,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_is_capped_and_monotonic() {
        let policy = SessionPolicy::default();
        assert_eq!(policy.grow(1024, 8192), 4096);
        assert_eq!(policy.grow(4096, 8192), 8192);
        assert_eq!(policy.grow(8192, 8192), 8192);
        // A budget already past the ceiling is never shrunk.
        assert_eq!(policy.grow(4096, 2048), 4096);
    }

    #[test]
    fn odd_growth_factors_never_shrink() {
        for factor in [0.5, 0.0, -3.0, f64::NAN, f64::INFINITY] {
            let policy = SessionPolicy::default().with_growth_factor(factor);
            assert_eq!(policy.grow(1024, 8192), 1024, "factor {factor}");
        }
        let policy = SessionPolicy::default().with_growth_factor(1.5);
        assert_eq!(policy.grow(1000, 8192), 1500);
    }

    #[test]
    fn initial_length_clamped_to_ceiling() {
        let policy = SessionPolicy::default();
        assert_eq!(policy.initial_length(2048), 1024);
        assert_eq!(policy.initial_length(512), 512);
    }

    #[test]
    fn decisions() {
        let policy = SessionPolicy::default();
        assert_eq!(
            policy.decide(FailureKind::SessionExpired, 1024, 2048, 3, 0),
            RetryDecision::Retry
        );
        assert_eq!(
            policy.decide(FailureKind::LengthExceeded, 1024, 2048, 0, 0),
            RetryDecision::Grow(2048)
        );
        assert_eq!(
            policy.decide(FailureKind::LengthExceeded, 2048, 2048, 0, 0),
            RetryDecision::Surface
        );
        assert_eq!(
            policy.decide(FailureKind::Transport, 1024, 2048, 0, 0),
            RetryDecision::Retry
        );
        assert_eq!(
            policy.decide(FailureKind::Transport, 1024, 2048, 1, 1),
            RetryDecision::Surface
        );
        assert_eq!(
            policy.decide(FailureKind::Overloaded, 1024, 2048, 0, 0),
            RetryDecision::Surface
        );
        assert_eq!(
            policy.decide(FailureKind::Other, 1024, 2048, 0, 0),
            RetryDecision::Surface
        );
    }

    #[test]
    fn retries_are_bounded() {
        let policy = SessionPolicy::default().with_max_auto_retries(2);
        assert_eq!(
            policy.decide(FailureKind::SessionExpired, 1024, 2048, 0, 2),
            RetryDecision::Surface
        );
    }
}
