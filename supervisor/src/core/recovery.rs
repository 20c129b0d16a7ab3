//! Failure-pattern recovery decisions
//!
//! Pure policy: given the failure at hand, the crash streak, and a rolling
//! failure history, choose restart, wait, escalate, or give up. The heuristic
//! rules are the contract; a remote or learned decision source can replace
//! them behind [`DecisionStrategy`] without changing the decision shape or
//! the history bookkeeping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use resilience::{BoundedQueue, OverflowStrategy};
use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;
use shared::{FailureReason, RecoveryAction, RecoveryDecision, RecoverySnapshot, WorkerStatsSnapshot};

/// One past failure with the decision it drew
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub reason: FailureReason,
    /// How long the worker had been up when it failed
    pub uptime_ms: u64,
    pub action: RecoveryAction,
}

/// Everything a strategy gets to look at for one failure
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub reason: FailureReason,
    pub consecutive_crashes: u32,
    pub uptime_ms: u64,
    pub worker: WorkerStatsSnapshot,
}

/// Pluggable decision source
///
/// `history` holds prior failures only, newest last; the failure being
/// decided is described by `ctx`.
pub trait DecisionStrategy: Send + Sync {
    fn decide(&self, ctx: &RecoveryContext, history: &[FailureRecord]) -> RecoveryDecision;
}

/// Built-in heuristic rules, evaluated in priority order
pub struct HeuristicStrategy {
    config: RecoveryConfig,
}

impl HeuristicStrategy {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    fn failures_in_window<'a>(&self, history: &'a [FailureRecord]) -> Vec<&'a FailureRecord> {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(self.config.rapid_failure_window_ms as i64);
        history.iter().filter(|record| record.at >= cutoff).collect()
    }
}

impl DecisionStrategy for HeuristicStrategy {
    fn decide(&self, ctx: &RecoveryContext, history: &[FailureRecord]) -> RecoveryDecision {
        let cfg = &self.config;
        let recent = self.failures_in_window(history);
        let recent_short = recent
            .iter()
            .filter(|record| record.uptime_ms < cfg.boot_loop_uptime_ms)
            .count();

        // 1. Boot loop: repeated near-instant deaths mean restarting alone
        //    will not help.
        if recent_short >= cfg.rapid_failure_count {
            return RecoveryDecision::new(
                RecoveryAction::Escalate,
                0.9,
                format!(
                    "boot loop: {recent_short} failures under {}ms uptime within the window",
                    cfg.boot_loop_uptime_ms
                ),
            )
            .with_metadata(serde_json::json!({
                "rule": "boot_loop",
                "recent_short_failures": recent_short,
            }));
        }

        // 2. Rapid failures: back off hard before burning the restart budget.
        if recent.len() >= cfg.rapid_failure_count {
            let backoff = 1_000u64
                .saturating_mul(2u64.saturating_pow(recent.len().min(16) as u32))
                .min(cfg.max_wait_ms);
            return RecoveryDecision::new(
                RecoveryAction::Wait,
                0.8,
                format!("{} failures within the window, backing off", recent.len()),
            )
            .with_wait_ms(backoff)
            .with_metadata(serde_json::json!({
                "rule": "rapid_failures",
                "recent_failures": recent.len(),
            }));
        }

        // 3. Hangs are usually deadlocks; a fresh process clears them.
        if ctx.reason == FailureReason::Hang {
            return RecoveryDecision::new(
                RecoveryAction::Restart,
                0.85,
                "hang detected, probable deadlock, restarting immediately",
            )
            .with_metadata(serde_json::json!({ "rule": "hang" }));
        }

        // 4. The manager already exhausted its restart budget.
        if ctx.reason == FailureReason::MaxRestarts {
            return RecoveryDecision::new(
                RecoveryAction::Escalate,
                0.95,
                "restart ceiling hit, automatic recovery exhausted",
            )
            .with_metadata(serde_json::json!({ "rule": "max_restarts" }));
        }

        // 5. A long stable run before the crash points at a transient fault.
        if ctx.uptime_ms >= cfg.stable_uptime_ms {
            return RecoveryDecision::new(
                RecoveryAction::Restart,
                0.75,
                format!("worker was stable for {}ms, treating crash as transient", ctx.uptime_ms),
            )
            .with_metadata(serde_json::json!({
                "rule": "was_stable",
                "uptime_ms": ctx.uptime_ms,
            }));
        }

        // 6. Early in the episode: keep restarting with a short linear pause.
        if ctx.consecutive_crashes <= cfg.early_episode_crashes {
            let wait = u64::from(ctx.consecutive_crashes) * 1_000;
            return RecoveryDecision::new(
                RecoveryAction::Restart,
                0.7,
                format!("early in episode ({} consecutive crashes)", ctx.consecutive_crashes),
            )
            .with_wait_ms(wait)
            .with_metadata(serde_json::json!({
                "rule": "early_episode",
                "consecutive_crashes": ctx.consecutive_crashes,
            }));
        }

        // 7. Mid episode: slow down linearly with the streak.
        if ctx.consecutive_crashes <= cfg.mid_episode_crashes {
            let wait = (u64::from(ctx.consecutive_crashes) * 5_000).min(cfg.max_wait_ms);
            return RecoveryDecision::new(
                RecoveryAction::Wait,
                0.65,
                format!("mid episode ({} consecutive crashes), waiting", ctx.consecutive_crashes),
            )
            .with_wait_ms(wait)
            .with_metadata(serde_json::json!({
                "rule": "mid_episode",
                "consecutive_crashes": ctx.consecutive_crashes,
            }));
        }

        // 8. Nothing above matched and the streak keeps growing.
        RecoveryDecision::new(
            RecoveryAction::GiveUp,
            0.8,
            format!("{} consecutive crashes, no pattern suggests recovery", ctx.consecutive_crashes),
        )
        .with_metadata(serde_json::json!({
            "rule": "give_up",
            "consecutive_crashes": ctx.consecutive_crashes,
        }))
    }
}

/// Summary of recent stability derived from the rolling window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub failures_in_window: usize,
    pub failures_per_minute: f64,
    pub avg_uptime_ms: Option<f64>,
    pub dominant_reason: Option<FailureReason>,
    pub recommendation: String,
}

/// Owns the failure history and delegates the choice to a strategy
pub struct RecoveryEngine {
    config: RecoveryConfig,
    strategy: Box<dyn DecisionStrategy>,
    history: BoundedQueue<FailureRecord>,
    recent_decisions: BoundedQueue<RecoveryDecision>,
    last_decision: Option<RecoveryDecision>,
    total_failures: u64,
    total_decisions: u64,
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig, decision_window: usize) -> Self {
        let strategy = Box::new(HeuristicStrategy::new(config.clone()));
        Self::with_strategy(config, decision_window, strategy)
    }

    /// Swap in a different decision source; bookkeeping stays the same
    pub fn with_strategy(
        config: RecoveryConfig,
        decision_window: usize,
        strategy: Box<dyn DecisionStrategy>,
    ) -> Self {
        let history_size = config.history_size.max(1);
        Self {
            config,
            strategy,
            history: BoundedQueue::new(history_size, OverflowStrategy::DropOldest),
            recent_decisions: BoundedQueue::new(decision_window.max(1), OverflowStrategy::DropOldest),
            last_decision: None,
            total_failures: 0,
            total_decisions: 0,
        }
    }

    /// Decide what to do about one failure and record it
    pub fn decide(&mut self, ctx: &RecoveryContext) -> RecoveryDecision {
        let history: Vec<FailureRecord> = self.history.iter().cloned().collect();
        let decision = self.strategy.decide(ctx, &history);

        let _ = self.history.enqueue(FailureRecord {
            at: Utc::now(),
            reason: ctx.reason,
            uptime_ms: ctx.uptime_ms,
            action: decision.action,
        });
        let _ = self.recent_decisions.enqueue(decision.clone());
        self.last_decision = Some(decision.clone());
        self.total_failures += 1;
        self.total_decisions += 1;

        decision
    }

    /// Summarize recent stability from the same rolling window the rules use
    pub fn analyze_patterns(&self) -> PatternAnalysis {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(self.config.rapid_failure_window_ms as i64);
        let recent: Vec<&FailureRecord> = self.history.iter().filter(|r| r.at >= cutoff).collect();

        let window_minutes = self.config.rapid_failure_window_ms as f64 / 60_000.0;
        let failures_per_minute = if window_minutes > 0.0 {
            recent.len() as f64 / window_minutes
        } else {
            0.0
        };

        let avg_uptime_ms = if recent.is_empty() {
            None
        } else {
            let total: u64 = recent.iter().map(|r| r.uptime_ms).sum();
            Some(total as f64 / recent.len() as f64)
        };

        let dominant_reason = {
            let mut counts: Vec<(FailureReason, usize)> = Vec::new();
            for record in &recent {
                match counts.iter_mut().find(|(reason, _)| *reason == record.reason) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((record.reason, 1)),
                }
            }
            counts.into_iter().max_by_key(|(_, count)| *count).map(|(reason, _)| reason)
        };

        let recommendation = match (recent.len(), avg_uptime_ms) {
            (0, _) => "stable: no failures in the window".to_string(),
            (n, Some(avg)) if n >= self.config.rapid_failure_count && avg < self.config.boot_loop_uptime_ms as f64 => {
                "boot loop suspected: investigate startup path before restarting".to_string()
            }
            (n, _) if n >= self.config.rapid_failure_count => {
                "failing rapidly: widen restart backoff or check dependencies".to_string()
            }
            _ => "occasional failures: automatic restarts should suffice".to_string(),
        };

        PatternAnalysis {
            failures_in_window: recent.len(),
            failures_per_minute,
            avg_uptime_ms,
            dominant_reason,
            recommendation,
        }
    }

    /// Recovery activity for the supervisor's stats snapshot
    pub fn snapshot(&self) -> RecoverySnapshot {
        RecoverySnapshot {
            total_failures: self.total_failures,
            total_decisions: self.total_decisions,
            last_decision: self.last_decision.clone(),
            recent_decisions: self.recent_decisions.iter().cloned().collect(),
        }
    }

    #[cfg(test)]
    fn seed_failure(&mut self, record: FailureRecord) {
        let _ = self.history.enqueue(record);
    }
}
