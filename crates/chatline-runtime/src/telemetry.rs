//! Generation speed measurement.
//!
//! Provides:
//! - [`SpeedMeter`]: records step timestamps and computes a rolling speed
//! - [`SpeedReport`]: the figure shown to the user, with a "slow" flag
//! - [`GenerationMetrics`]: summary of one generate call
//! - [`TelemetryHook`] trait with [`NoopTelemetry`] / [`LogTelemetry`]
//!
//! The first response of a generate call includes session warm-up and prompt
//! processing, so the speed estimate only counts intervals from the second
//! response onward.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Unit in which generation speed is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedUnit {
    SecondsPerToken,
    TokensPerSecond,
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedUnit::SecondsPerToken => write!(f, "sec/token"),
            SpeedUnit::TokensPerSecond => write!(f, "tokens/sec"),
        }
    }
}

impl FromStr for SpeedUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sec-per-token" | "sec/token" | "spt" => Ok(SpeedUnit::SecondsPerToken),
            "tokens-per-sec" | "tokens/sec" | "tps" => Ok(SpeedUnit::TokensPerSecond),
            other => Err(format!(
                "unknown speed unit {other:?} (expected sec-per-token or tokens-per-sec)"
            )),
        }
    }
}

/// How speed is reported and when it counts as slow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedConfig {
    pub unit: SpeedUnit,
    /// In `unit`. Seconds/token at or above it is slow; tokens/second below it is slow.
    pub slow_threshold: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self::new(SpeedUnit::SecondsPerToken)
    }
}

impl SpeedConfig {
    /// Config for `unit` with its default threshold (3 sec/token, 0.5 tokens/sec).
    pub fn new(unit: SpeedUnit) -> Self {
        let slow_threshold = match unit {
            SpeedUnit::SecondsPerToken => 3.0,
            SpeedUnit::TokensPerSecond => 0.5,
        };
        Self {
            unit,
            slow_threshold,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: f64) -> Self {
        self.slow_threshold = threshold;
        self
    }

    fn is_slow(&self, value: f64) -> bool {
        match self.unit {
            SpeedUnit::SecondsPerToken => value >= self.slow_threshold,
            SpeedUnit::TokensPerSecond => value < self.slow_threshold,
        }
    }
}

/// A speed figure ready for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReport {
    pub unit: SpeedUnit,
    pub value: f64,
    /// Whether the speed crossed the configured threshold.
    pub slow: bool,
}

impl fmt::Display for SpeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} {}", self.value, self.unit)
    }
}

/// Summary of one generate call.
#[derive(Debug, Clone)]
pub struct GenerationMetrics {
    /// Latency of the first response in milliseconds (includes warm-up).
    pub first_step_ms: f64,
    /// Responses received.
    pub steps: usize,
    /// Tokens received across all responses.
    pub tokens: usize,
    /// Tokens per second over the measured interval (second response onward).
    pub tokens_per_sec: f64,
    /// Wall-clock time from start to the last response, in milliseconds.
    pub total_time_ms: f64,
}

/// Callback trait for generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called when the first response arrives.
    fn on_first_step(&self, _latency_ms: f64) {}

    /// Called after every response.
    fn on_step(&self, _step_idx: usize, _elapsed_ms: f64) {}

    /// Called when a generate call finishes.
    fn on_generation_complete(&self, _metrics: &GenerationMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Logs generation metrics through `tracing` and keeps the last ones.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<GenerationMetrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_metrics(&self) -> Option<GenerationMetrics> {
        self.last_report.lock().unwrap().clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_first_step(&self, latency_ms: f64) {
        tracing::debug!(latency_ms, "first response");
    }

    fn on_generation_complete(&self, metrics: &GenerationMetrics) {
        tracing::debug!(
            steps = metrics.steps,
            tokens = metrics.tokens,
            tokens_per_sec = metrics.tokens_per_sec,
            total_time_ms = metrics.total_time_ms,
            "generation complete"
        );
        *self.last_report.lock().unwrap() = Some(metrics.clone());
    }
}

/// Measures the speed of one generate call.
///
/// 1. Create with [`SpeedMeter::new`] right before the generate request
/// 2. Call [`mark_step`](SpeedMeter::mark_step) on every response
/// 3. Call [`finish`](SpeedMeter::finish) when the call completes
pub struct SpeedMeter {
    config: SpeedConfig,
    start: Instant,
    first_step: Option<Duration>,
    last_step: Option<Instant>,
    measured: Duration,
    measured_tokens: usize,
    steps: usize,
    tokens: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl SpeedMeter {
    pub fn new(config: SpeedConfig, hook: Arc<dyn TelemetryHook>) -> Self {
        Self::starting_at(config, hook, Instant::now())
    }

    /// Meter whose clock starts at `start`.
    pub fn starting_at(config: SpeedConfig, hook: Arc<dyn TelemetryHook>, start: Instant) -> Self {
        Self {
            config,
            start,
            first_step: None,
            last_step: None,
            measured: Duration::ZERO,
            measured_tokens: 0,
            steps: 0,
            tokens: 0,
            hook,
        }
    }

    /// Record a response carrying `tokens` tokens, returning the current speed
    /// once at least one interval has been measured.
    pub fn mark_step(&mut self, tokens: usize) -> Option<SpeedReport> {
        self.mark_step_at(Instant::now(), tokens)
    }

    pub fn mark_step_at(&mut self, now: Instant, tokens: usize) -> Option<SpeedReport> {
        self.steps += 1;
        self.tokens += tokens;
        match self.last_step {
            Some(last) => {
                self.measured += now.saturating_duration_since(last);
                self.measured_tokens += tokens;
            }
            None => {
                let latency = now.saturating_duration_since(self.start);
                self.first_step = Some(latency);
                self.hook.on_first_step(latency.as_secs_f64() * 1000.0);
            }
        }
        self.last_step = Some(now);

        let elapsed_ms = now.saturating_duration_since(self.start).as_secs_f64() * 1000.0;
        self.hook.on_step(self.steps, elapsed_ms);
        self.report()
    }

    /// Current speed, or `None` before the second response.
    pub fn report(&self) -> Option<SpeedReport> {
        let secs = self.measured.as_secs_f64();
        if self.measured_tokens == 0 || secs <= 0.0 {
            return None;
        }
        let value = match self.config.unit {
            SpeedUnit::SecondsPerToken => secs / self.measured_tokens as f64,
            SpeedUnit::TokensPerSecond => self.measured_tokens as f64 / secs,
        };
        Some(SpeedReport {
            unit: self.config.unit,
            value,
            slow: self.config.is_slow(value),
        })
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self) -> GenerationMetrics {
        let secs = self.measured.as_secs_f64();
        let tokens_per_sec = if secs > 0.0 {
            self.measured_tokens as f64 / secs
        } else {
            0.0
        };
        let total_time_ms = self
            .last_step
            .map(|t| t.saturating_duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let metrics = GenerationMetrics {
            first_step_ms: self
                .first_step
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or(0.0),
            steps: self.steps,
            tokens: self.tokens,
            tokens_per_sec,
            total_time_ms,
        };
        self.hook.on_generation_complete(&metrics);
        metrics
    }
}
