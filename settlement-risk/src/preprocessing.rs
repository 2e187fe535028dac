//! Preprocessing - robust scaling for numeric inputs, one-hot encoding for categoricals
//!
//! Vector layout: the [`NUMERIC_FEATURES`] block first, then one block per entry of
//! [`CATEGORICAL_FEATURES`], each block sorted by category. Categories unseen at
//! fit time encode to all zeros.

use crate::error::PreprocessError;
use common::contract::{CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use common::EnrichedTrade;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Centers on the median and scales by the interquartile range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustScaler {
    pub center: f64,
    pub scale: f64,
}

impl RobustScaler {
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { center: 0.0, scale: 1.0 };
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let center = quantile(&sorted, 0.5);
        let iqr = quantile(&sorted, 0.75) - quantile(&sorted, 0.25);
        // Constant column: leave the spread untouched
        let scale = if iqr > 0.0 { iqr } else { 1.0 };

        Self { center, scale }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.center) / self.scale
    }
}

/// Linear-interpolation quantile of an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Sorted category list for one categorical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalVocabulary {
    pub field: String,
    pub categories: Vec<String>,
}

impl CategoricalVocabulary {
    pub fn fit<'a>(field: &str, values: impl IntoIterator<Item = &'a str>) -> Self {
        let categories: BTreeSet<&str> = values.into_iter().collect();
        Self {
            field: field.to_string(),
            categories: categories.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.index_of(value).is_some()
    }

    /// Append the one-hot block for `value`; unknown values leave it all zeros.
    pub fn encode_into(&self, value: &str, out: &mut Vec<f64>) {
        let start = out.len();
        out.resize(start + self.width(), 0.0);
        if let Some(idx) = self.index_of(value) {
            out[start + idx] = 1.0;
        }
    }

    pub fn encode(&self, value: &str) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.width());
        self.encode_into(value, &mut out);
        out
    }

    /// Inverse of [`encode`](Self::encode). The all-zero block decodes to `None`.
    pub fn decode(&self, block: &[f64]) -> Option<&str> {
        if block.len() != self.width() {
            return None;
        }

        block
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| self.categories[idx].as_str())
    }

    pub fn feature_names(&self) -> impl Iterator<Item = String> + '_ {
        self.categories
            .iter()
            .map(move |category| format!("{}_{}", self.field, category))
    }
}

/// Fitted preprocessing state shared by training and serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    scalers: Vec<RobustScaler>,
    vocabularies: Vec<CategoricalVocabulary>,
}

impl Preprocessor {
    pub fn fit(trades: &[EnrichedTrade]) -> Result<Self, PreprocessError> {
        if trades.is_empty() {
            return Err(PreprocessError::EmptyInput);
        }

        for trade in trades {
            check_finite(trade)?;
        }

        let scalers = (0..NUMERIC_FEATURES.len())
            .map(|col| {
                let column: Vec<f64> = trades.iter().map(|t| t.numeric_values()[col]).collect();
                RobustScaler::fit(&column)
            })
            .collect();

        let vocabularies = CATEGORICAL_FEATURES
            .iter()
            .enumerate()
            .map(|(col, field)| {
                CategoricalVocabulary::fit(field, trades.iter().map(|t| t.categorical_values()[col]))
            })
            .collect();

        Ok(Self {
            scalers,
            vocabularies,
        })
    }

    /// Length of every transformed vector
    pub fn width(&self) -> usize {
        self.scalers.len() + self.vocabularies.iter().map(|v| v.width()).sum::<usize>()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = NUMERIC_FEATURES.iter().map(|n| n.to_string()).collect();
        for vocabulary in &self.vocabularies {
            names.extend(vocabulary.feature_names());
        }
        names
    }

    pub fn scalers(&self) -> &[RobustScaler] {
        &self.scalers
    }

    pub fn vocabulary(&self, field: &str) -> Option<&CategoricalVocabulary> {
        self.vocabularies.iter().find(|v| v.field == field)
    }

    /// Categorical fields whose value was never seen during fitting.
    pub fn unknown_categories(&self, trade: &EnrichedTrade) -> Vec<&'static str> {
        CATEGORICAL_FEATURES
            .iter()
            .zip(trade.categorical_values())
            .zip(&self.vocabularies)
            .filter(|((_, value), vocabulary)| !vocabulary.contains(value))
            .map(|((field, _), _)| *field)
            .collect()
    }

    pub fn transform(&self, trade: &EnrichedTrade) -> Result<Vec<f64>, PreprocessError> {
        if self.scalers.len() != NUMERIC_FEATURES.len()
            || self.vocabularies.len() != CATEGORICAL_FEATURES.len()
        {
            return Err(PreprocessError::NotFitted);
        }
        check_finite(trade)?;

        let mut row = Vec::with_capacity(self.width());
        for (scaler, value) in self.scalers.iter().zip(trade.numeric_values()) {
            row.push(scaler.transform(value));
        }
        for (vocabulary, value) in self.vocabularies.iter().zip(trade.categorical_values()) {
            vocabulary.encode_into(value, &mut row);
        }

        Ok(row)
    }

    pub fn transform_batch(&self, trades: &[EnrichedTrade]) -> Result<Vec<Vec<f64>>, PreprocessError> {
        trades.iter().map(|t| self.transform(t)).collect()
    }
}

fn check_finite(trade: &EnrichedTrade) -> Result<(), PreprocessError> {
    for (field, value) in NUMERIC_FEATURES.into_iter().zip(trade.numeric_values()) {
        if !value.is_finite() {
            return Err(PreprocessError::NonFinite { field, value });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(asset: &str, ssi: &str, notional: f64, vix: f64, hour: u32) -> EnrichedTrade {
        EnrichedTrade {
            asset_class: asset.to_string(),
            counterparty_rating: "AA".to_string(),
            custodian_location: "US".to_string(),
            ssi_status: ssi.to_string(),
            liquidity_score: "High".to_string(),
            operation_type: "DVP".to_string(),
            currency: "USD".to_string(),
            market_volatility_index: vix,
            notional_amount_usd: notional,
            trade_day: "Monday".to_string(),
            trade_hour: hour,
        }
    }

    fn fitted() -> Preprocessor {
        let trades = vec![
            trade("Equity", "Match", 1_000.0, 10.0, 9),
            trade("FX", "Match", 2_000.0, 12.0, 10),
            trade("Corp Bond", "Mismatch", 3_000.0, 14.0, 11),
            trade("Equity", "Match", 4_000.0, 16.0, 12),
            trade("Equity", "Match", 5_000.0, 18.0, 13),
        ];
        Preprocessor::fit(&trades).unwrap()
    }

    #[test]
    fn test_robust_scaler_median_and_iqr() {
        let scaler = RobustScaler::fit(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(scaler.center, 3.0);
        assert_eq!(scaler.scale, 2.0);
        assert_eq!(scaler.transform(5.0), 1.0);
    }

    #[test]
    fn test_robust_scaler_interpolates_between_ranks() {
        let scaler = RobustScaler::fit(&[4.0, 1.0, 3.0, 2.0]);
        assert!((scaler.center - 2.5).abs() < 1e-12);
        assert!((scaler.scale - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_keeps_unit_scale() {
        let scaler = RobustScaler::fit(&[7.0; 10]);
        assert_eq!(scaler.scale, 1.0);
        assert_eq!(scaler.transform(7.0), 0.0);
    }

    #[test]
    fn test_vocabulary_encode_decode() {
        let vocab = CategoricalVocabulary::fit("Currency", ["USD", "EUR", "USD", "GBP"]);
        assert_eq!(vocab.categories, vec!["EUR", "GBP", "USD"]);
        assert_eq!(vocab.encode("GBP"), vec![0.0, 1.0, 0.0]);
        assert_eq!(vocab.decode(&[0.0, 1.0, 0.0]), Some("GBP"));
        assert_eq!(vocab.encode("CHF"), vec![0.0, 0.0, 0.0]);
        assert_eq!(vocab.decode(&[0.0, 0.0, 0.0]), None);
    }

    #[test]
    fn test_layout_and_names() {
        let pre = fitted();
        let names = pre.feature_names();
        assert_eq!(names.len(), pre.width());
        assert_eq!(&names[..3], &NUMERIC_FEATURES.map(String::from));
        assert_eq!(names[3], "Asset_Class_Corp Bond");
        assert!(names.contains(&"SSI_Status_Mismatch".to_string()));
        assert!(names.contains(&"Trade_Day_Monday".to_string()));
    }

    #[test]
    fn test_transform_width_and_one_hot() {
        let pre = fitted();
        let row = pre.transform(&trade("FX", "Mismatch", 3_000.0, 14.0, 11)).unwrap();
        assert_eq!(row.len(), pre.width());
        // Medians of the fit data map to zero
        assert_eq!(&row[..3], &[0.0, 0.0, 0.0]);

        let names = pre.feature_names();
        let one_hot_total: f64 = row[3..].iter().sum();
        assert_eq!(one_hot_total, CATEGORICAL_FEATURES.len() as f64);
        let fx = names.iter().position(|n| n == "Asset_Class_FX").unwrap();
        assert_eq!(row[fx], 1.0);
    }

    #[test]
    fn test_unknown_category_encodes_to_zeros() {
        let pre = fitted();
        let row = pre.transform(&trade("Crypto", "Match", 3_000.0, 14.0, 11)).unwrap();
        let asset_block = &row[3..3 + pre.vocabulary("Asset_Class").unwrap().width()];
        assert!(asset_block.iter().all(|v| *v == 0.0));
        assert_eq!(
            pre.unknown_categories(&trade("Crypto", "Match", 1.0, 1.0, 1)),
            vec!["Asset_Class"]
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let pre = fitted();
        let err = pre.transform(&trade("FX", "Match", f64::NAN, 14.0, 11)).unwrap_err();
        assert!(matches!(err, PreprocessError::NonFinite { field: "Notional_Amount_USD", .. }));
        assert_eq!(Preprocessor::fit(&[]).unwrap_err(), PreprocessError::EmptyInput);
    }

    #[test]
    fn test_same_input_same_vector() {
        let pre = fitted();
        let t = trade("Equity", "Match", 1_234.5, 17.3, 15);
        assert_eq!(pre.transform(&t).unwrap(), pre.transform(&t).unwrap());
    }
}
