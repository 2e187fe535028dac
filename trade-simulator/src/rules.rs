//! Causal failure rules
//!
//! Ground truth for the synthetic dataset. Each rule is a boolean predicate over
//! one enriched trade plus an additive increment on top of the base rate.

use common::contract::{
    BASE_CURRENCY, CUTOFF_HOUR, LAST_BUSINESS_DAY, LOW_LIQUIDITY, NEXT_WORST_RATING, RISKY_BOND,
    SSI_MISMATCH, WORST_RATING,
};
use common::EnrichedTrade;

/// Operational noise floor applied to every trade.
pub const BASE_FAILURE_RATE: f64 = 0.01;
pub const WHALE_NOTIONAL_USD: f64 = 100_000_000.0;
pub const VOLATILITY_SHOCK_LEVEL: f64 = 30.0;

/// One hand-specified settlement failure driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CausalRule {
    /// Standing settlement instructions disagree
    SsiMismatch,
    /// Worst-tier counterparty on a corporate bond
    JunkBond,
    /// Next-worst tier on a corporate bond
    WeakCreditBond,
    /// Non-base-currency trade booked on Friday after the cutoff
    FridayAfternoon,
    /// Very large ticket in an illiquid instrument
    IlliquidWhale,
    /// Market-wide stress
    VolatilityShock,
}

impl CausalRule {
    pub fn increment(&self) -> f64 {
        match self {
            CausalRule::SsiMismatch => 0.90,
            CausalRule::JunkBond => 0.30,
            CausalRule::WeakCreditBond => 0.15,
            CausalRule::FridayAfternoon => 0.15,
            CausalRule::IlliquidWhale => 0.25,
            CausalRule::VolatilityShock => 0.05,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CausalRule::SsiMismatch => "ssi_mismatch",
            CausalRule::JunkBond => "junk_bond",
            CausalRule::WeakCreditBond => "weak_credit_bond",
            CausalRule::FridayAfternoon => "friday_afternoon",
            CausalRule::IlliquidWhale => "illiquid_whale",
            CausalRule::VolatilityShock => "volatility_shock",
        }
    }
}

/// Rules that fire for `trade`, in evaluation order.
pub fn triggered_rules(trade: &EnrichedTrade) -> Vec<CausalRule> {
    let mut rules = Vec::new();

    if trade.ssi_status == SSI_MISMATCH {
        rules.push(CausalRule::SsiMismatch);
    }

    // Credit rules are exclusive: most severe match wins.
    if trade.asset_class == RISKY_BOND {
        if trade.counterparty_rating == WORST_RATING {
            rules.push(CausalRule::JunkBond);
        } else if trade.counterparty_rating == NEXT_WORST_RATING {
            rules.push(CausalRule::WeakCreditBond);
        }
    }

    if trade.trade_day == LAST_BUSINESS_DAY
        && trade.trade_hour >= CUTOFF_HOUR
        && trade.currency != BASE_CURRENCY
    {
        rules.push(CausalRule::FridayAfternoon);
    }

    if trade.notional_amount_usd > WHALE_NOTIONAL_USD && trade.liquidity_score == LOW_LIQUIDITY {
        rules.push(CausalRule::IlliquidWhale);
    }

    if trade.market_volatility_index > VOLATILITY_SHOCK_LEVEL {
        rules.push(CausalRule::VolatilityShock);
    }

    rules
}

/// Ground-truth failure probability, clipped to 1.0.
pub fn causal_failure_probability(trade: &EnrichedTrade) -> f64 {
    let prob = triggered_rules(trade)
        .iter()
        .fold(BASE_FAILURE_RATE, |acc, rule| acc + rule.increment());
    prob.min(1.0)
}
