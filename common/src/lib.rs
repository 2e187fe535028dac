//! Shared trade types and the feature contract
//!
//! Both the offline training path and the online scoring path depend on this
//! crate for field names, categorical domains and calendar feature derivation.

pub mod contract;
pub mod derive;
pub mod trade;

pub use contract::FEATURE_CONTRACT_VERSION;
pub use derive::{derive_calendar, derive_features, parse_trade_timestamp, CalendarFeatures, DeriveError};
pub use trade::{DatasetRow, EnrichedTrade, LabeledTrade, TradeRecord};
