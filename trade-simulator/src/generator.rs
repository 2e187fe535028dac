//! Synthetic trade generation

use crate::rules::causal_failure_probability;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use common::contract::{
    ASSET_CLASSES, CURRENCIES, JURISDICTIONS, LIQUIDITY_TIERS, OPERATION_TYPES, RATINGS,
    SSI_STATUSES,
};
use common::{derive_features, DatasetRow, DeriveError, LabeledTrade, TradeRecord};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{LogNormal, Normal};
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("invalid distribution for {field}: {reason}")]
    InvalidDistribution { field: &'static str, reason: String },

    #[error(transparent)]
    Derive(#[from] DeriveError),

    #[error("failed to write dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write dataset: {0}")]
    Io(#[from] std::io::Error),
}

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Seed for every random draw; same seed and row count give the same dataset
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// First calendar day trades may be booked on
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,

    /// Number of calendar days trades are spread over
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Settlement lag in business days
    #[serde(default = "default_settlement_lag")]
    pub settlement_lag_days: u32,

    #[serde(default)]
    pub distributions: FieldWeights,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            start_date: default_start_date(),
            window_days: default_window_days(),
            settlement_lag_days: default_settlement_lag(),
            distributions: FieldWeights::default(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default()
}

fn default_window_days() -> u32 {
    365
}

fn default_settlement_lag() -> u32 {
    2
}

/// Sampling weights and continuous-distribution parameters per raw field.
///
/// Weight vectors line up with the domains in `common::contract`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub asset_class: Vec<f64>,
    pub rating: Vec<f64>,
    pub jurisdiction: Vec<f64>,
    pub ssi_status: Vec<f64>,
    pub liquidity: Vec<f64>,
    pub operation_type: Vec<f64>,
    pub currency: Vec<f64>,
    pub volatility_mean: f64,
    pub volatility_std: f64,
    /// Log-space location of the notional distribution
    pub notional_log_mean: f64,
    /// Log-space scale; large values give the heavy "whale" tail
    pub notional_log_sigma: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            asset_class: vec![0.5, 0.2, 0.15, 0.1, 0.05],
            rating: vec![0.15, 0.25, 0.3, 0.2, 0.08, 0.02],
            jurisdiction: vec![0.5, 0.3, 0.2],
            ssi_status: vec![0.98, 0.02],
            liquidity: vec![0.6, 0.3, 0.1],
            operation_type: vec![0.9, 0.1],
            currency: vec![0.6, 0.2, 0.1, 0.05, 0.05],
            volatility_mean: 15.0,
            volatility_std: 5.0,
            notional_log_mean: 14.0,
            notional_log_sigma: 1.5,
        }
    }
}

/// A fixed categorical domain with its sampling weights.
struct Categorical {
    values: &'static [&'static str],
    index: WeightedIndex<f64>,
}

impl Categorical {
    fn new(
        field: &'static str,
        values: &'static [&'static str],
        weights: &[f64],
    ) -> Result<Self, SimulatorError> {
        if values.len() != weights.len() {
            return Err(SimulatorError::InvalidDistribution {
                field,
                reason: format!("{} weights for {} categories", weights.len(), values.len()),
            });
        }
        let index = WeightedIndex::new(weights).map_err(|e| SimulatorError::InvalidDistribution {
            field,
            reason: e.to_string(),
        })?;
        Ok(Self { values, index })
    }

    fn sample(&self, rng: &mut StdRng) -> String {
        self.values[self.index.sample(rng)].to_string()
    }
}

/// Generates labeled trades from the causal failure model.
pub struct CausalSimulator {
    config: SimulatorConfig,
    asset_class: Categorical,
    rating: Categorical,
    jurisdiction: Categorical,
    ssi_status: Categorical,
    liquidity: Categorical,
    operation_type: Categorical,
    currency: Categorical,
    volatility: Normal,
    notional: LogNormal,
}

impl CausalSimulator {
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        let w = &config.distributions;

        let volatility = Normal::new(w.volatility_mean, w.volatility_std).map_err(|e| {
            SimulatorError::InvalidDistribution {
                field: "Market_Volatility_Index",
                reason: e.to_string(),
            }
        })?;
        let notional = LogNormal::new(w.notional_log_mean, w.notional_log_sigma).map_err(|e| {
            SimulatorError::InvalidDistribution {
                field: "Notional_Amount_USD",
                reason: e.to_string(),
            }
        })?;

        if config.window_days == 0 {
            return Err(SimulatorError::InvalidDistribution {
                field: "Trade_Date",
                reason: "window_days must be positive".to_string(),
            });
        }

        Ok(Self {
            asset_class: Categorical::new("Asset_Class", &ASSET_CLASSES, &w.asset_class)?,
            rating: Categorical::new("Counterparty_Rating", &RATINGS, &w.rating)?,
            jurisdiction: Categorical::new("Custodian_Location", &JURISDICTIONS, &w.jurisdiction)?,
            ssi_status: Categorical::new("SSI_Status", &SSI_STATUSES, &w.ssi_status)?,
            liquidity: Categorical::new("Liquidity_Score", &LIQUIDITY_TIERS, &w.liquidity)?,
            operation_type: Categorical::new("Operation_Type", &OPERATION_TYPES, &w.operation_type)?,
            currency: Categorical::new("Currency", &CURRENCIES, &w.currency)?,
            volatility,
            notional,
            config,
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Generate `rows` labeled trades.
    pub fn generate(&self, rows: usize) -> Result<Vec<LabeledTrade>, SimulatorError> {
        info!(rows, seed = self.config.seed, "Generating synthetic trades");

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut trades = Vec::with_capacity(rows);

        for _ in 0..rows {
            let record = self.sample_record(&mut rng);
            let enriched = derive_features(&record)?;
            let failure_prob = causal_failure_probability(&enriched);
            // Bernoulli draw, not a threshold: keeps irreducible noise in the labels.
            let is_failed = rng.gen_bool(failure_prob);

            trades.push(LabeledTrade {
                record,
                failure_prob,
                is_failed,
            });
        }

        let failures = trades.iter().filter(|t| t.is_failed).count();
        info!(
            rows,
            failures,
            failure_rate = failures as f64 / rows.max(1) as f64,
            "Dataset generated"
        );

        Ok(trades)
    }

    fn sample_record(&self, rng: &mut StdRng) -> TradeRecord {
        let trade_ts = self.sample_timestamp(rng);
        let settlement = add_business_days(trade_ts.date(), self.config.settlement_lag_days);

        let volatility = round2(self.volatility.sample(rng)).max(0.0);
        let notional = round2(self.notional.sample(rng)).max(0.01);

        TradeRecord {
            trade_id: random_uuid(rng).to_string(),
            trade_date: trade_ts.format(TIMESTAMP_FORMAT).to_string(),
            settlement_date: settlement.format("%Y-%m-%d").to_string(),
            asset_class: self.asset_class.sample(rng),
            counterparty_id: random_uuid(rng).to_string(),
            counterparty_rating: self.rating.sample(rng),
            custodian_location: self.jurisdiction.sample(rng),
            ssi_status: self.ssi_status.sample(rng),
            liquidity_score: self.liquidity.sample(rng),
            market_volatility_index: volatility,
            operation_type: self.operation_type.sample(rng),
            currency: self.currency.sample(rng),
            notional_amount_usd: notional,
            isin: random_isin(rng),
        }
    }

    fn sample_timestamp(&self, rng: &mut StdRng) -> NaiveDateTime {
        let day = rng.gen_range(0..self.config.window_days);
        let second_of_day = rng.gen_range(0..86_400u32);
        let midnight = self
            .config
            .start_date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default();
        midnight + Duration::days(i64::from(day)) + Duration::seconds(i64::from(second_of_day))
    }
}

/// Roll forward `days` business days, skipping weekends.
pub fn add_business_days(start: NaiveDate, days: u32) -> NaiveDate {
    let mut date = start;
    let mut remaining = days;
    while remaining > 0 {
        date += Duration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    date
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn random_uuid(rng: &mut StdRng) -> Uuid {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid()
}

fn random_isin(rng: &mut StdRng) -> String {
    let mut isin = String::with_capacity(12);
    for _ in 0..2 {
        isin.push(rng.gen_range(b'A'..=b'Z') as char);
    }
    for _ in 0..10 {
        isin.push(rng.gen_range(b'0'..=b'9') as char);
    }
    isin
}

/// Write trades as a labeled CSV dataset.
pub fn write_csv<W: Write>(trades: &[LabeledTrade], writer: W) -> Result<(), SimulatorError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for trade in trades {
        csv_writer.serialize(DatasetRow::from_labeled(trade)?)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_csv_file<P: AsRef<Path>>(trades: &[LabeledTrade], path: P) -> Result<(), SimulatorError> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)?;
    write_csv(trades, std::io::BufWriter::new(file))?;
    debug!(path = %path.display(), rows = trades.len(), "Dataset written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::BASE_FAILURE_RATE;
    use chrono::Timelike;
    use common::parse_trade_timestamp;

    fn simulate(rows: usize, seed: u64) -> Vec<LabeledTrade> {
        let config = SimulatorConfig {
            seed,
            ..Default::default()
        };
        CausalSimulator::new(config).unwrap().generate(rows).unwrap()
    }

    fn failure_rate<'a>(trades: impl Iterator<Item = &'a LabeledTrade>) -> (usize, f64) {
        let (n, failed) = trades.fold((0usize, 0usize), |(n, f), t| (n + 1, f + t.is_failed as usize));
        (n, failed as f64 / n.max(1) as f64)
    }

    #[test]
    fn test_same_seed_gives_identical_dataset() {
        let a = simulate(2_000, 7);
        let b = simulate(2_000, 7);
        assert_eq!(a, b);

        let mut csv_a = Vec::new();
        let mut csv_b = Vec::new();
        write_csv(&a, &mut csv_a).unwrap();
        write_csv(&b, &mut csv_b).unwrap();
        assert_eq!(csv_a, csv_b);
    }

    #[test]
    fn test_different_seed_differs() {
        assert_ne!(simulate(200, 1), simulate(200, 2));
    }

    #[test]
    fn test_ssi_mismatch_almost_always_fails() {
        let trades = simulate(50_000, 42);
        let (n, rate) = failure_rate(trades.iter().filter(|t| t.record.ssi_status == "Mismatch"));
        assert!(n > 500, "too few mismatches sampled: {}", n);
        assert!(rate >= 0.85, "SSI mismatch failure rate {:.3}", rate);
    }

    #[test]
    fn test_junk_bond_fails_more_than_baseline() {
        let trades = simulate(50_000, 42);
        let is_junk = |t: &LabeledTrade| {
            t.record.counterparty_rating == "CCC" && t.record.asset_class == "Corp Bond"
        };

        let (_, overall) = failure_rate(trades.iter());
        let (n_junk, junk) = failure_rate(trades.iter().filter(|t| is_junk(t)));
        // Comparable trades: same SSI status, not junk.
        let (_, others) = failure_rate(
            trades
                .iter()
                .filter(|t| !is_junk(t) && t.record.ssi_status == "Match"),
        );

        assert!(n_junk > 50, "too few junk bonds sampled: {}", n_junk);
        assert!(junk > overall, "junk {:.3} vs overall {:.3}", junk, overall);
        assert!(junk > others, "junk {:.3} vs others {:.3}", junk, others);
        assert!(junk > BASE_FAILURE_RATE);
    }

    #[test]
    fn test_field_invariants() {
        for trade in simulate(5_000, 3) {
            let r = &trade.record;
            assert!(r.notional_amount_usd > 0.0);
            assert!(r.market_volatility_index >= 0.0);
            assert!((0.0..=1.0).contains(&trade.failure_prob));
            assert!(trade.failure_prob >= BASE_FAILURE_RATE);
            assert_eq!(r.isin.len(), 12);

            let settled = NaiveDate::parse_from_str(&r.settlement_date, "%Y-%m-%d").unwrap();
            assert!(!matches!(settled.weekday(), Weekday::Sat | Weekday::Sun));
            assert!(settled > parse_trade_timestamp(&r.trade_date).unwrap().date());
        }
    }

    #[test]
    fn test_trade_hours_cover_the_whole_day() {
        let trades = simulate(5_000, 11);
        let hours: std::collections::HashSet<u32> = trades
            .iter()
            .map(|t| parse_trade_timestamp(&t.record.trade_date).unwrap().hour())
            .collect();
        assert_eq!(hours.len(), 24);
    }

    #[test]
    fn test_business_day_roll() {
        let friday = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        assert_eq!(add_business_days(friday, 2), NaiveDate::from_ymd_opt(2025, 1, 7).unwrap());
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        assert_eq!(add_business_days(monday, 2), NaiveDate::from_ymd_opt(2025, 1, 8).unwrap());
    }

    #[test]
    fn test_mismatched_weights_are_rejected() {
        let mut config = SimulatorConfig::default();
        config.distributions.currency = vec![1.0, 1.0];
        assert!(matches!(
            CausalSimulator::new(config),
            Err(SimulatorError::InvalidDistribution { field: "Currency", .. })
        ));
    }
}
