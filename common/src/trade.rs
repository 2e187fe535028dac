//! Trade records and the labeled dataset row schema

use crate::contract::{CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use crate::derive::{derive_calendar, CalendarFeatures, DeriveError};
use serde::{Deserialize, Serialize};

/// Raw trade as booked, before any feature derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    /// Naive UTC wall-clock timestamp, `YYYY-MM-DD HH:MM:SS`
    pub trade_date: String,
    pub settlement_date: String,
    pub asset_class: String,
    pub counterparty_id: String,
    pub counterparty_rating: String,
    pub custodian_location: String,
    pub ssi_status: String,
    pub liquidity_score: String,
    pub market_volatility_index: f64,
    pub operation_type: String,
    pub currency: String,
    pub notional_amount_usd: f64,
    pub isin: String,
}

/// Simulator output: a trade plus its training-only ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledTrade {
    pub record: TradeRecord,
    /// Causal failure probability assigned by the rule set
    pub failure_prob: f64,
    /// Realized Bernoulli outcome
    pub is_failed: bool,
}

/// Model-facing view of a trade: raw fields plus derived calendar features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTrade {
    pub asset_class: String,
    pub counterparty_rating: String,
    pub custodian_location: String,
    pub ssi_status: String,
    pub liquidity_score: String,
    pub operation_type: String,
    pub currency: String,
    pub market_volatility_index: f64,
    pub notional_amount_usd: f64,
    pub trade_day: String,
    pub trade_hour: u32,
}

impl EnrichedTrade {
    /// Numeric inputs in [`NUMERIC_FEATURES`] order.
    pub fn numeric_values(&self) -> [f64; NUMERIC_FEATURES.len()] {
        [
            self.notional_amount_usd,
            self.market_volatility_index,
            f64::from(self.trade_hour),
        ]
    }

    /// Categorical inputs in [`CATEGORICAL_FEATURES`] order.
    pub fn categorical_values(&self) -> [&str; CATEGORICAL_FEATURES.len()] {
        [
            &self.asset_class,
            &self.counterparty_rating,
            &self.ssi_status,
            &self.liquidity_score,
            &self.custodian_location,
            &self.operation_type,
            &self.currency,
            &self.trade_day,
        ]
    }
}

/// One row of the labeled CSV dataset.
///
/// Reference columns (IDs, ISIN, settlement date, the calendar helper columns and
/// the causal probability) are optional on read: training never consumes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    #[serde(rename = "Trade_ID", default)]
    pub trade_id: String,
    #[serde(rename = "Trade_Date")]
    pub trade_date: String,
    #[serde(rename = "Settlement_Date", default)]
    pub settlement_date: String,
    #[serde(rename = "Trade_Day", default)]
    pub trade_day: String,
    #[serde(rename = "Trade_Hour", default)]
    pub trade_hour: u32,
    #[serde(rename = "Asset_Class")]
    pub asset_class: String,
    #[serde(rename = "Counterparty_ID", default)]
    pub counterparty_id: String,
    #[serde(rename = "Counterparty_Rating")]
    pub counterparty_rating: String,
    #[serde(rename = "Custodian_Location")]
    pub custodian_location: String,
    #[serde(rename = "SSI_Status")]
    pub ssi_status: String,
    #[serde(rename = "Liquidity_Score")]
    pub liquidity_score: String,
    #[serde(rename = "Market_Volatility_Index")]
    pub market_volatility_index: f64,
    #[serde(rename = "Operation_Type")]
    pub operation_type: String,
    #[serde(rename = "Currency")]
    pub currency: String,
    #[serde(rename = "Notional_Amount_USD")]
    pub notional_amount_usd: f64,
    #[serde(rename = "ISIN", default)]
    pub isin: String,
    #[serde(rename = "Failure_Prob", default)]
    pub failure_prob: f64,
    #[serde(rename = "IS_FAILED")]
    pub is_failed: u8,
}

impl DatasetRow {
    /// Flatten a labeled trade, writing the derived calendar helper columns.
    pub fn from_labeled(trade: &LabeledTrade) -> Result<Self, DeriveError> {
        let calendar = derive_calendar(&trade.record.trade_date)?;
        let r = &trade.record;
        Ok(Self {
            trade_id: r.trade_id.clone(),
            trade_date: r.trade_date.clone(),
            settlement_date: r.settlement_date.clone(),
            trade_day: calendar.weekday_name().to_string(),
            trade_hour: calendar.hour,
            asset_class: r.asset_class.clone(),
            counterparty_id: r.counterparty_id.clone(),
            counterparty_rating: r.counterparty_rating.clone(),
            custodian_location: r.custodian_location.clone(),
            ssi_status: r.ssi_status.clone(),
            liquidity_score: r.liquidity_score.clone(),
            market_volatility_index: r.market_volatility_index,
            operation_type: r.operation_type.clone(),
            currency: r.currency.clone(),
            notional_amount_usd: r.notional_amount_usd,
            isin: r.isin.clone(),
            failure_prob: trade.failure_prob,
            is_failed: u8::from(trade.is_failed),
        })
    }

    pub fn into_labeled(self) -> LabeledTrade {
        LabeledTrade {
            failure_prob: self.failure_prob,
            is_failed: self.is_failed != 0,
            record: TradeRecord {
                trade_id: self.trade_id,
                trade_date: self.trade_date,
                settlement_date: self.settlement_date,
                asset_class: self.asset_class,
                counterparty_id: self.counterparty_id,
                counterparty_rating: self.counterparty_rating,
                custodian_location: self.custodian_location,
                ssi_status: self.ssi_status,
                liquidity_score: self.liquidity_score,
                market_volatility_index: self.market_volatility_index,
                operation_type: self.operation_type,
                currency: self.currency,
                notional_amount_usd: self.notional_amount_usd,
                isin: self.isin,
            },
        }
    }
}

impl EnrichedTrade {
    /// Assemble the model view from raw fields and already-derived calendar features.
    pub fn from_record(record: &TradeRecord, calendar: CalendarFeatures) -> Self {
        Self {
            asset_class: record.asset_class.clone(),
            counterparty_rating: record.counterparty_rating.clone(),
            custodian_location: record.custodian_location.clone(),
            ssi_status: record.ssi_status.clone(),
            liquidity_score: record.liquidity_score.clone(),
            operation_type: record.operation_type.clone(),
            currency: record.currency.clone(),
            market_volatility_index: record.market_volatility_index,
            notional_amount_usd: record.notional_amount_usd,
            trade_day: calendar.weekday_name().to_string(),
            trade_hour: calendar.hour,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trade() -> LabeledTrade {
        LabeledTrade {
            record: TradeRecord {
                trade_id: "t-1".to_string(),
                trade_date: "2025-03-07 17:15:00".to_string(),
                settlement_date: "2025-03-11".to_string(),
                asset_class: "Corp Bond".to_string(),
                counterparty_id: "cp-1".to_string(),
                counterparty_rating: "CCC".to_string(),
                custodian_location: "EU".to_string(),
                ssi_status: "Match".to_string(),
                liquidity_score: "Low".to_string(),
                market_volatility_index: 22.5,
                operation_type: "DVP".to_string(),
                currency: "EUR".to_string(),
                notional_amount_usd: 1_250_000.0,
                isin: "AB1234567890".to_string(),
            },
            failure_prob: 0.46,
            is_failed: true,
        }
    }

    #[test]
    fn test_dataset_row_writes_calendar_helpers() {
        let row = DatasetRow::from_labeled(&sample_trade()).unwrap();
        assert_eq!(row.trade_day, "Friday");
        assert_eq!(row.trade_hour, 17);
        assert_eq!(row.is_failed, 1);
        assert_eq!(row.into_labeled(), sample_trade());
    }

    #[test]
    fn test_optional_reference_columns_default_on_read() {
        let data = "Trade_Date,Asset_Class,Counterparty_Rating,Custodian_Location,SSI_Status,\
Liquidity_Score,Market_Volatility_Index,Operation_Type,Currency,Notional_Amount_USD,IS_FAILED\n\
2025-01-06 09:00:00,Equity,AA,US,Match,High,14.2,DVP,USD,1000000.0,0\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let row: DatasetRow = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(row.asset_class, "Equity");
        assert!(row.trade_id.is_empty());
        assert_eq!(row.failure_prob, 0.0);
    }

    #[test]
    fn test_feature_views_follow_contract_order() {
        let trade = sample_trade();
        let calendar = derive_calendar(&trade.record.trade_date).unwrap();
        let enriched = EnrichedTrade::from_record(&trade.record, calendar);

        assert_eq!(enriched.numeric_values(), [1_250_000.0, 22.5, 17.0]);
        assert_eq!(
            enriched.categorical_values(),
            ["Corp Bond", "CCC", "Match", "Low", "EU", "DVP", "EUR", "Friday"]
        );
    }
}
