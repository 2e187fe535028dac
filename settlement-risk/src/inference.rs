//! Scoring path
//!
//! [`ScoringContext`] owns the loaded artifact bundle behind an `Arc` snapshot.
//! Each `score` call clones the `Arc` and runs lock-free; `reload` swaps in a
//! freshly loaded bundle without disturbing calls already in flight.

use crate::artifacts::ArtifactBundle;
use crate::config::ServingConfig;
use crate::error::{ArtifactError, ScoringError};
use common::contract::columns;
use common::{derive_features, CalendarFeatures, EnrichedTrade, TradeRecord};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

const DEFAULT_CUSTODIAN_LOCATION: &str = "US";
const DEFAULT_OPERATION_TYPE: &str = "DVP";
const DEFAULT_CURRENCY: &str = "USD";

/// A trade submitted for scoring, keyed by the dataset column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    #[serde(rename = "Trade_ID", default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    #[serde(rename = "Trade_Date", default, skip_serializing_if = "Option::is_none")]
    pub trade_date: Option<String>,
    #[serde(rename = "Settlement_Date", default, skip_serializing_if = "Option::is_none")]
    pub settlement_date: Option<String>,
    #[serde(rename = "Asset_Class", default)]
    pub asset_class: Option<String>,
    #[serde(rename = "Counterparty_Rating", default)]
    pub counterparty_rating: Option<String>,
    #[serde(rename = "Custodian_Location", default)]
    pub custodian_location: Option<String>,
    #[serde(rename = "SSI_Status", default)]
    pub ssi_status: Option<String>,
    #[serde(rename = "Liquidity_Score", default)]
    pub liquidity_score: Option<String>,
    #[serde(rename = "Market_Volatility_Index", default)]
    pub market_volatility_index: Option<f64>,
    #[serde(rename = "Operation_Type", default)]
    pub operation_type: Option<String>,
    #[serde(rename = "Currency", default)]
    pub currency: Option<String>,
    #[serde(rename = "Notional_Amount_USD", default)]
    pub notional_amount_usd: Option<f64>,
    /// Used only when `Trade_Date` is absent
    #[serde(rename = "Trade_Day", default, skip_serializing_if = "Option::is_none")]
    pub trade_day: Option<String>,
    /// Hour of day; a fractional hour falls into the hour it started in
    #[serde(rename = "Trade_Hour", default, skip_serializing_if = "Option::is_none")]
    pub trade_hour: Option<f64>,
}

impl ScoreRequest {
    /// Validate and enrich the request through the shared feature derivation.
    pub fn to_enriched(&self) -> Result<EnrichedTrade, ScoringError> {
        let notional = required_number(self.notional_amount_usd, columns::NOTIONAL_AMOUNT_USD)?;
        if notional <= 0.0 {
            return Err(ScoringError::InvalidField {
                field: columns::NOTIONAL_AMOUNT_USD,
                reason: format!("must be positive, got {}", notional),
            });
        }

        let volatility = required_number(self.market_volatility_index, columns::MARKET_VOLATILITY_INDEX)?;
        if volatility < 0.0 {
            return Err(ScoringError::InvalidField {
                field: columns::MARKET_VOLATILITY_INDEX,
                reason: format!("must be non-negative, got {}", volatility),
            });
        }

        let record = TradeRecord {
            trade_id: self.trade_id.clone().unwrap_or_default(),
            trade_date: self.trade_date.clone().unwrap_or_default(),
            settlement_date: self.settlement_date.clone().unwrap_or_default(),
            asset_class: required_text(&self.asset_class, columns::ASSET_CLASS)?,
            counterparty_id: String::new(),
            counterparty_rating: required_text(&self.counterparty_rating, columns::COUNTERPARTY_RATING)?,
            custodian_location: optional_text(&self.custodian_location, DEFAULT_CUSTODIAN_LOCATION),
            ssi_status: required_text(&self.ssi_status, columns::SSI_STATUS)?,
            liquidity_score: required_text(&self.liquidity_score, columns::LIQUIDITY_SCORE)?,
            market_volatility_index: volatility,
            operation_type: optional_text(&self.operation_type, DEFAULT_OPERATION_TYPE),
            currency: optional_text(&self.currency, DEFAULT_CURRENCY),
            notional_amount_usd: notional,
            isin: String::new(),
        };

        let explicit_hour = self.trade_hour.map(whole_hour).transpose()?;
        let explicit_day = self.trade_day.as_deref().map(str::trim).filter(|d| !d.is_empty());

        match self.trade_date.as_deref().map(str::trim) {
            Some(ts) if !ts.is_empty() => {
                let trade = derive_features(&record).map_err(|e| ScoringError::InvalidField {
                    field: columns::TRADE_DATE,
                    reason: e.to_string(),
                })?;
                if let Some(day) = explicit_day.filter(|d| *d != trade.trade_day) {
                    return Err(ScoringError::InvalidField {
                        field: columns::TRADE_DAY,
                        reason: format!("'{}' contradicts Trade_Date ({})", day, trade.trade_day),
                    });
                }
                if let Some(hour) = explicit_hour.filter(|h| *h != trade.trade_hour) {
                    return Err(ScoringError::InvalidField {
                        field: columns::TRADE_HOUR,
                        reason: format!("{} contradicts Trade_Date ({})", hour, trade.trade_hour),
                    });
                }
                Ok(trade)
            }
            _ => {
                let default = CalendarFeatures::SERVING_DEFAULT;
                let day = explicit_day.unwrap_or(default.weekday_name());
                let hour = explicit_hour.unwrap_or(default.hour);
                let calendar = CalendarFeatures::from_parts(day, hour).map_err(|e| ScoringError::InvalidField {
                    field: columns::TRADE_DAY,
                    reason: e.to_string(),
                })?;
                Ok(EnrichedTrade::from_record(&record, calendar))
            }
        }
    }
}

fn whole_hour(hour: f64) -> Result<u32, ScoringError> {
    if !hour.is_finite() || !(0.0..24.0).contains(&hour) {
        return Err(ScoringError::InvalidField {
            field: columns::TRADE_HOUR,
            reason: format!("must be within 0-23, got {}", hour),
        });
    }
    Ok(hour.floor() as u32)
}

fn required_text(value: &Option<String>, field: &'static str) -> Result<String, ScoringError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ScoringError::MissingField(field)),
    }
}

fn optional_text(value: &Option<String>, default: &str) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

fn required_number(value: Option<f64>, field: &'static str) -> Result<f64, ScoringError> {
    let value = value.ok_or(ScoringError::MissingField(field))?;
    if !value.is_finite() {
        return Err(ScoringError::InvalidField {
            field,
            reason: format!("must be finite, got {}", value),
        });
    }
    Ok(value)
}

/// Risk tier derived from the failure probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_probability(probability: f64) -> Self {
        if probability > 0.8 {
            RiskLevel::Critical
        } else if probability > 0.5 {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Per-feature breakdown of a prediction's margin
#[derive(Debug, Clone, PartialEq)]
pub enum Explanation {
    Available {
        base_value: f64,
        feature_contributions: Vec<f64>,
    },
    Unavailable {
        reason: String,
    },
}

impl Explanation {
    pub fn is_available(&self) -> bool {
        matches!(self, Explanation::Available { .. })
    }
}

impl Serialize for Explanation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (base_value, contributions): (f64, &[f64]) = match self {
            Explanation::Available {
                base_value,
                feature_contributions,
            } => (*base_value, feature_contributions.as_slice()),
            Explanation::Unavailable { .. } => (0.0, &[][..]),
        };

        let mut state = serializer.serialize_struct("Explanation", 2)?;
        state.serialize_field("base_value", &base_value)?;
        state.serialize_field("feature_contributions", contributions)?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    pub failure_probability: f64,
    pub prediction: u8,
    pub risk_level: RiskLevel,
    pub explanation: Explanation,
    pub model_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: ServiceState,
    pub model_version: String,
    pub attribution_available: bool,
    pub feature_count: usize,
    /// Last load or reload failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Loaded model state for the scoring boundary
pub struct ScoringContext {
    bundle: RwLock<Option<Arc<ArtifactBundle>>>,
    last_error: RwLock<Option<String>>,
    config: ServingConfig,
}

impl ScoringContext {
    /// Load artifacts from `dir`. A failed load yields a degraded context.
    pub fn load<P: AsRef<Path>>(dir: P, config: &ServingConfig) -> Self {
        let dir = dir.as_ref();
        match ArtifactBundle::load(dir) {
            Ok(bundle) => Self::from_bundle(bundle, config.clone()),
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Model load failed; serving degraded");
                Self {
                    bundle: RwLock::new(None),
                    last_error: RwLock::new(Some(e.to_string())),
                    config: config.clone(),
                }
            }
        }
    }

    pub fn from_bundle(bundle: ArtifactBundle, config: ServingConfig) -> Self {
        Self {
            bundle: RwLock::new(Some(Arc::new(bundle))),
            last_error: RwLock::new(None),
            config,
        }
    }

    /// Current bundle, if one is loaded
    pub fn snapshot(&self) -> Option<Arc<ArtifactBundle>> {
        self.bundle
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn score(&self, request: &ScoreRequest) -> Result<PredictionResult, ScoringError> {
        let bundle = self.snapshot().ok_or(ScoringError::ModelUnavailable)?;
        let trade = request.to_enriched()?;

        let unknown = bundle.preprocessor.unknown_categories(&trade);
        if !unknown.is_empty() {
            debug!(fields = ?unknown, "Unseen categories encoded as zeros");
        }

        let x = bundle.preprocessor.transform(&trade)?;
        let expected = bundle.classifier.n_features();
        if x.len() != expected {
            return Err(ScoringError::FeatureMismatch {
                expected,
                actual: x.len(),
            });
        }

        let failure_probability = bundle.classifier.probability(&x).clamp(0.0, 1.0);
        let risk_level = RiskLevel::from_probability(failure_probability);
        let explanation = self.explain(&bundle, &x);

        debug!(
            trade_id = request.trade_id.as_deref().unwrap_or("-"),
            probability = failure_probability,
            risk = risk_level.as_str(),
            "Scored trade"
        );

        Ok(PredictionResult {
            trade_id: request.trade_id.clone(),
            failure_probability,
            prediction: u8::from(failure_probability > 0.5),
            risk_level,
            explanation,
            model_version: self.config.model_version.clone(),
        })
    }

    fn explain(&self, bundle: &ArtifactBundle, x: &[f64]) -> Explanation {
        if !self.config.attribution_enabled {
            return Explanation::Unavailable {
                reason: "attribution disabled".to_string(),
            };
        }

        let Some(explainer) = &bundle.explainer else {
            return Explanation::Unavailable {
                reason: bundle
                    .explainer_issue()
                    .unwrap_or("attribution model not loaded")
                    .to_string(),
            };
        };

        match explainer.explain(x) {
            Ok(attribution) => Explanation::Available {
                base_value: attribution.base_value,
                feature_contributions: attribution.contributions,
            },
            Err(e) => {
                warn!(error = %e, "Attribution failed; returning probability only");
                Explanation::Unavailable { reason: e.to_string() }
            }
        }
    }

    pub fn health(&self) -> HealthStatus {
        let bundle = self.snapshot();
        let detail = self
            .last_error
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        HealthStatus {
            status: if bundle.is_some() {
                ServiceState::Healthy
            } else {
                ServiceState::Degraded
            },
            model_version: self.config.model_version.clone(),
            attribution_available: self.config.attribution_enabled
                && bundle.as_ref().map_or(false, |b| b.explainer.is_some()),
            feature_count: bundle.as_ref().map_or(0, |b| b.feature_count()),
            detail,
        }
    }

    /// Load a new bundle and swap it in. On failure the current bundle stays.
    pub fn reload<P: AsRef<Path>>(&self, dir: P) -> Result<(), ArtifactError> {
        let dir = dir.as_ref();
        match ArtifactBundle::load(dir) {
            Ok(bundle) => {
                *self.bundle.write().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Some(Arc::new(bundle));
                *self.last_error.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
                info!(dir = %dir.display(), "Reloaded model");
                Ok(())
            }
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Reload failed; keeping current model");
                *self.last_error.write().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Drop the loaded bundle. Later `score` calls fail with `ModelUnavailable`.
    pub fn unload(&self) {
        *self.bundle.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        info!("Model unloaded");
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }
}
