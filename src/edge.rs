//! Implied probability and edge arithmetic for player props.
//!
//! The cache layer passes bookmaker prices through untouched; this module
//! gives callers an explicit shape for them ([`PriceQuote`]) and the few
//! formulas needed to compare a trend-based probability against the
//! bookmaker's break-even probability.

use serde::{Deserialize, Serialize};

/// A bookmaker price for one prop, as far as it could be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceQuote {
    /// No price found for this prop.
    NoPrice,
    /// American odds without a line.
    Price { american: f64 },
    /// American odds together with the prop line (e.g. 4.5 receptions).
    PriceAndLine { american: f64, line: f64 },
}

impl PriceQuote {
    /// American odds, if any.
    pub fn american(&self) -> Option<f64> {
        match self {
            Self::NoPrice => None,
            Self::Price { american } | Self::PriceAndLine { american, .. } => Some(*american),
        }
    }

    /// Prop line, if any.
    pub fn line(&self) -> Option<f64> {
        match self {
            Self::PriceAndLine { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Break-even probability of American odds.
///
/// `+150` → 0.4, `-120` → 0.545…. Returns `None` for values that are not
/// valid American odds (finite and `|odds| >= 100`).
pub fn american_to_prob(american: f64) -> Option<f64> {
    if !american.is_finite() || american.abs() < 100.0 {
        return None;
    }
    if american > 0.0 {
        Some(100.0 / (american + 100.0))
    } else {
        Some(-american / (-american + 100.0))
    }
}

/// Fraction of `samples` at or above `threshold`, or `None` if there are
/// no samples.
///
/// With a prop line of 3.5, a threshold of 4 counts the games that cleared it.
pub fn hit_rate(samples: &[f64], threshold: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let hits = samples.iter().filter(|&&s| s >= threshold).count();
    Some(hits as f64 / samples.len() as f64)
}

/// Trend probability compared against the bookmaker's price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Probability estimated from recent performance.
    pub model_prob: f64,
    /// Break-even probability implied by the price, if priced.
    pub implied_prob: Option<f64>,
    /// `model_prob - implied_prob`, if priced.
    pub edge: Option<f64>,
}

impl Edge {
    pub fn evaluate(model_prob: f64, quote: &PriceQuote) -> Self {
        let implied_prob = quote.american().and_then(american_to_prob);
        Self {
            model_prob,
            implied_prob,
            edge: implied_prob.map(|implied| model_prob - implied),
        }
    }

    /// Whether the trend beats the price. Unpriced props never do.
    pub fn is_positive(&self) -> bool {
        self.edge.is_some_and(|e| e > 0.0)
    }
}
