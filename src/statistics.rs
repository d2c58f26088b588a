use crate::models::{AnalysisResult, Severity};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub total_analyzed: u64,
    pub total_blocked: u64,
    pub total_warnings: u64,
    pub session_overrides: u64,
}

#[derive(Debug, Clone)]
pub enum StatEvent {
    /// A fresh analysis finished with this result
    Analyzed { safe: bool, severity: Severity },
    /// The user overrode a warning
    Override,
}

/// Counters plus the bounded, newest-first analysis history
#[derive(Debug)]
pub struct StatisticsCollector {
    stats: Stats,
    history: VecDeque<AnalysisResult>,
    history_limit: usize,
}

impl StatisticsCollector {
    pub fn new(history_limit: usize) -> Self {
        Self {
            stats: Stats::default(),
            history: VecDeque::with_capacity(history_limit.min(1024)),
            history_limit,
        }
    }

    pub fn restore(stats: Stats, history: Vec<AnalysisResult>, history_limit: usize) -> Self {
        let mut history: VecDeque<AnalysisResult> = history.into();
        history.truncate(history_limit);
        Self {
            stats,
            history,
            history_limit,
        }
    }

    pub fn record_event(&mut self, event: StatEvent) {
        match event {
            StatEvent::Analyzed { safe, severity } => {
                self.stats.total_analyzed += 1;
                if !safe {
                    if severity == Severity::High {
                        self.stats.total_blocked += 1;
                    } else {
                        self.stats.total_warnings += 1;
                    }
                }
            }
            StatEvent::Override => {
                self.stats.session_overrides += 1;
            }
        }
    }

    /// Newest first; the oldest entry falls off past the limit
    pub fn push_history(&mut self, result: AnalysisResult) {
        if self.history_limit == 0 {
            return;
        }
        self.history.push_front(result);
        self.history.truncate(self.history_limit);
    }

    pub fn stats(&self) -> Stats {
        self.stats.clone()
    }

    pub fn history(&self) -> Vec<AnalysisResult> {
        self.history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
