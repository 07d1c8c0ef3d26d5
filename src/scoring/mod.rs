//! Capability scoring.
//!
//! [`ScoreCalculator::score`] is a pure function of a set of probe results:
//! five weighted components, each in `0.0..=1.0`, summed and rounded into an
//! integer score between 0 and 100, then bucketed into a
//! [`CapabilityCategory`].

use crate::probe::{ProbeKind, ProbeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;


/// Weights for the capability score. Must sum to 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub existence: f64,
    pub responsiveness: f64,
    pub features: f64,
    pub latency: f64,
    pub transport: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            existence: 0.20,
            responsiveness: 0.25,
            features: 0.30,
            latency: 0.15,
            transport: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), String> {
        let weights = [
            self.existence,
            self.responsiveness,
            self.features,
            self.latency,
            self.transport,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("scoring weights must be finite and non-negative".to_string());
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("scoring weights must sum to 1.0, got {sum:.4}"));
        }
        Ok(())
    }
}

/// Linear band: 1.0 at or below `best`, 0.0 at or above `worst`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatencyBand {
    pub best: Duration,
    pub worst: Duration,
}

impl LatencyBand {
    pub fn rate(&self, observed: Duration) -> f64 {
        if observed <= self.best {
            return 1.0;
        }
        if observed >= self.worst {
            return 0.0;
        }
        let span = (self.worst - self.best).as_secs_f64();
        1.0 - (observed - self.best).as_secs_f64() / span
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    FullyCapable,
    CapableWithTooling,
    ChatWithTooling,
    ChatOnly,
}

impl CapabilityCategory {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::FullyCapable,
            60..=79 => Self::CapableWithTooling,
            40..=59 => Self::ChatWithTooling,
            _ => Self::ChatOnly,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::FullyCapable => "fully capable",
            Self::CapableWithTooling => "capable with tooling",
            Self::ChatWithTooling => "chat with tooling",
            Self::ChatOnly => "chat only",
        }
    }
}

impl fmt::Display for CapabilityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-component values, each in `0.0..=1.0`, before weighting
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub existence: f64,
    pub responsiveness: f64,
    pub features: f64,
    pub latency: f64,
    pub transport: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: u8,
    pub category: CapabilityCategory,
    pub breakdown: ScoreBreakdown,
}

#[derive(Clone, Debug)]
pub struct ScoreCalculator {
    weights: ScoringWeights,
    latency_band: LatencyBand,
    responsiveness_band: LatencyBand,
}

impl Default for ScoreCalculator {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            latency_band: LatencyBand {
                best: Duration::from_millis(100),
                worst: Duration::from_millis(500),
            },
            responsiveness_band: LatencyBand {
                best: Duration::from_secs(1),
                worst: Duration::from_secs(10),
            },
        }
    }
}

impl ScoreCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create calculator with custom weights
    pub fn with_weights(mut self, weights: ScoringWeights) -> Result<Self, String> {
        weights.validate()?;
        self.weights = weights;
        Ok(self)
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, probes: &[ProbeResult]) -> Score {
        let breakdown = self.breakdown(probes);
        let w = &self.weights;
        let weighted = w.existence * breakdown.existence
            + w.responsiveness * breakdown.responsiveness
            + w.features * breakdown.features
            + w.latency * breakdown.latency
            + w.transport * breakdown.transport;

        let value = (weighted * 100.0).round().clamp(0.0, 100.0) as u8;
        Score {
            value,
            category: CapabilityCategory::from_score(value),
            breakdown,
        }
    }

    pub fn breakdown(&self, probes: &[ProbeResult]) -> ScoreBreakdown {
        let existence = find(probes, ProbeKind::Existence);
        let responsiveness = find(probes, ProbeKind::Responsiveness);

        let responsiveness_component = match responsiveness {
            Some(r) if r.passed => {
                let observed = r.latency.ttft.unwrap_or(r.latency.total);
                0.5 + 0.5 * self.responsiveness_band.rate(observed)
            }
            _ => 0.0,
        };

        let attempted = probes.iter().filter(|p| p.kind.is_feature()).count();
        let passed = probes
            .iter()
            .filter(|p| p.kind.is_feature() && p.passed)
            .count();
        let features = if attempted == 0 {
            0.0
        } else {
            passed as f64 / attempted as f64
        };

        // Round trip of the lightweight existence request, else first token
        let latency_sample = existence
            .filter(|p| p.passed)
            .map(|p| p.latency.total)
            .or_else(|| {
                responsiveness
                    .filter(|p| p.passed)
                    .and_then(|p| p.latency.ttft)
            });

        ScoreBreakdown {
            existence: pass_value(existence),
            responsiveness: responsiveness_component,
            features,
            latency: latency_sample
                .map(|d| self.latency_band.rate(d))
                .unwrap_or(0.0),
            transport: pass_value(find(probes, ProbeKind::Compression)),
        }
    }
}

fn find(probes: &[ProbeResult], kind: ProbeKind) -> Option<&ProbeResult> {
    probes.iter().find(|p| p.kind == kind)
}

fn pass_value(probe: Option<&ProbeResult>) -> f64 {
    if probe.is_some_and(|p| p.passed) { 1.0 } else { 0.0 }
}
