//! Rule-level sanity report over a generated dataset

use crate::rules::WHALE_NOTIONAL_USD;
use common::contract::{LOW_LIQUIDITY, RISKY_BOND, SSI_MISMATCH, WORST_RATING};
use common::LabeledTrade;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Empirical failure rate over a slice of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleStat {
    pub trades: usize,
    pub failures: usize,
    pub failure_rate: f64,
}

impl RuleStat {
    fn over<'a>(trades: impl Iterator<Item = &'a LabeledTrade>) -> Self {
        let (n, failures) = trades.fold((0usize, 0usize), |(n, f), t| {
            (n + 1, f + usize::from(t.is_failed))
        });
        Self {
            trades: n,
            failures,
            failure_rate: if n > 0 { failures as f64 / n as f64 } else { 0.0 },
        }
    }
}

/// Headline numbers for a generated dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub overall: RuleStat,
    pub mean_causal_probability: f64,
    pub ssi_mismatch: RuleStat,
    pub junk_bond: RuleStat,
    pub illiquid_whale: RuleStat,
}

impl DatasetSummary {
    pub fn from_trades(trades: &[LabeledTrade]) -> Self {
        let mean_causal_probability = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.failure_prob).sum::<f64>() / trades.len() as f64
        };

        Self {
            overall: RuleStat::over(trades.iter()),
            mean_causal_probability,
            ssi_mismatch: RuleStat::over(trades.iter().filter(|t| t.record.ssi_status == SSI_MISMATCH)),
            junk_bond: RuleStat::over(trades.iter().filter(|t| {
                t.record.counterparty_rating == WORST_RATING && t.record.asset_class == RISKY_BOND
            })),
            illiquid_whale: RuleStat::over(trades.iter().filter(|t| {
                t.record.notional_amount_usd > WHALE_NOTIONAL_USD
                    && t.record.liquidity_score == LOW_LIQUIDITY
            })),
        }
    }

    pub fn log(&self) {
        info!(
            rows = self.overall.trades,
            failures = self.overall.failures,
            "Failure rate: {:.2}%",
            self.overall.failure_rate * 100.0
        );
        info!(
            trades = self.ssi_mismatch.trades,
            "SSI mismatch failure rate: {:.2}%",
            self.ssi_mismatch.failure_rate * 100.0
        );
        info!(
            trades = self.junk_bond.trades,
            "Junk bond failure rate: {:.2}%",
            self.junk_bond.failure_rate * 100.0
        );
        info!(
            trades = self.illiquid_whale.trades,
            "Illiquid whale failure rate: {:.2}%",
            self.illiquid_whale.failure_rate * 100.0
        );
    }
}
