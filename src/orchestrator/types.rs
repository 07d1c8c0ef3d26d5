use crate::probe::{ProbeKind, ProbeResult};
use crate::scoring::{CapabilityCategory, Score, ScoreBreakdown};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Outcome of verifying one (provider, model) pair. A newer result
/// supersedes an older one; results are never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub probes: Vec<ProbeResult>,
    pub score: u8,
    pub category: CapabilityCategory,
    pub breakdown: ScoreBreakdown,
    pub verified_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, probes: Vec<ProbeResult>, score: Score) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            model: model.into(),
            probes,
            score: score.value,
            category: score.category,
            breakdown: score.breakdown,
            verified_at: Utc::now(),
        }
    }

    pub fn probe(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        self.probes.iter().find(|p| p.kind == kind)
    }

    pub fn passed_count(&self) -> usize {
        self.probes.iter().filter(|p| p.passed).count()
    }

    pub fn all_failed(&self) -> bool {
        self.probes.iter().all(|p| !p.passed)
    }
}

/// Per-key lifecycle: `Idle -> Probing -> Scoring -> Done -> Idle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    #[default]
    Idle,
    Probing,
    Scoring,
    Done,
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Probing => "probing",
            Self::Scoring => "scoring",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}
