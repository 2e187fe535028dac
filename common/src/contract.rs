//! Feature contract
//!
//! Canonical field names, categorical domains and feature ordering shared by the
//! simulator, the training pipeline and the scoring path. Anything that changes
//! how a raw trade becomes a model input must bump [`FEATURE_CONTRACT_VERSION`].

/// Version tag persisted with every trained artifact bundle.
pub const FEATURE_CONTRACT_VERSION: &str = "1";

pub const ASSET_CLASSES: [&str; 5] = ["Equity", "Gov Bond", "Corp Bond", "FX", "Derivatives"];
pub const RATINGS: [&str; 6] = ["AAA", "AA", "A", "BBB", "BB", "CCC"];
pub const CURRENCIES: [&str; 5] = ["USD", "EUR", "GBP", "JPY", "CAD"];
pub const JURISDICTIONS: [&str; 3] = ["US", "EU", "APAC"];
pub const SSI_STATUSES: [&str; 2] = ["Match", "Mismatch"];
pub const LIQUIDITY_TIERS: [&str; 3] = ["High", "Medium", "Low"];
pub const OPERATION_TYPES: [&str; 2] = ["DVP", "FOP"];
pub const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub const SSI_MISMATCH: &str = "Mismatch";
pub const BASE_CURRENCY: &str = "USD";
pub const RISKY_BOND: &str = "Corp Bond";
pub const WORST_RATING: &str = "CCC";
pub const NEXT_WORST_RATING: &str = "BB";
pub const LOW_LIQUIDITY: &str = "Low";
pub const LAST_BUSINESS_DAY: &str = "Friday";
/// Hour (UTC wall clock) from which the end-of-week cutoff applies.
pub const CUTOFF_HOUR: u32 = 16;

/// Column names as they appear in the labeled dataset and in scoring requests.
pub mod columns {
    pub const TRADE_ID: &str = "Trade_ID";
    pub const TRADE_DATE: &str = "Trade_Date";
    pub const SETTLEMENT_DATE: &str = "Settlement_Date";
    pub const TRADE_DAY: &str = "Trade_Day";
    pub const TRADE_HOUR: &str = "Trade_Hour";
    pub const ASSET_CLASS: &str = "Asset_Class";
    pub const COUNTERPARTY_ID: &str = "Counterparty_ID";
    pub const COUNTERPARTY_RATING: &str = "Counterparty_Rating";
    pub const CUSTODIAN_LOCATION: &str = "Custodian_Location";
    pub const SSI_STATUS: &str = "SSI_Status";
    pub const LIQUIDITY_SCORE: &str = "Liquidity_Score";
    pub const MARKET_VOLATILITY_INDEX: &str = "Market_Volatility_Index";
    pub const OPERATION_TYPE: &str = "Operation_Type";
    pub const CURRENCY: &str = "Currency";
    pub const NOTIONAL_AMOUNT_USD: &str = "Notional_Amount_USD";
    pub const ISIN: &str = "ISIN";
    pub const FAILURE_PROB: &str = "Failure_Prob";
    pub const IS_FAILED: &str = "IS_FAILED";
}

/// Numeric model inputs, in vector order.
pub const NUMERIC_FEATURES: [&str; 3] = [
    columns::NOTIONAL_AMOUNT_USD,
    columns::MARKET_VOLATILITY_INDEX,
    columns::TRADE_HOUR,
];

/// Categorical model inputs, in vector order (after the numeric block).
pub const CATEGORICAL_FEATURES: [&str; 8] = [
    columns::ASSET_CLASS,
    columns::COUNTERPARTY_RATING,
    columns::SSI_STATUS,
    columns::LIQUIDITY_SCORE,
    columns::CUSTODIAN_LOCATION,
    columns::OPERATION_TYPE,
    columns::CURRENCY,
    columns::TRADE_DAY,
];

/// Columns a labeled dataset must carry for training to start.
pub const REQUIRED_TRAINING_COLUMNS: [&str; 11] = [
    columns::TRADE_DATE,
    columns::ASSET_CLASS,
    columns::COUNTERPARTY_RATING,
    columns::CUSTODIAN_LOCATION,
    columns::SSI_STATUS,
    columns::LIQUIDITY_SCORE,
    columns::MARKET_VOLATILITY_INDEX,
    columns::OPERATION_TYPE,
    columns::CURRENCY,
    columns::NOTIONAL_AMOUNT_USD,
    columns::IS_FAILED,
];

/// Fixed domain of a categorical field, if the field has one.
pub fn domain_of(field: &str) -> Option<&'static [&'static str]> {
    match field {
        columns::ASSET_CLASS => Some(&ASSET_CLASSES),
        columns::COUNTERPARTY_RATING => Some(&RATINGS),
        columns::CURRENCY => Some(&CURRENCIES),
        columns::CUSTODIAN_LOCATION => Some(&JURISDICTIONS),
        columns::SSI_STATUS => Some(&SSI_STATUSES),
        columns::LIQUIDITY_SCORE => Some(&LIQUIDITY_TIERS),
        columns::OPERATION_TYPE => Some(&OPERATION_TYPES),
        columns::TRADE_DAY => Some(&WEEKDAYS),
        _ => None,
    }
}

/// Whether `value` belongs to the fixed domain of `field`.
///
/// Unknown values are legal inputs; they encode to the zero vector.
pub fn is_known(field: &str, value: &str) -> bool {
    domain_of(field).map_or(false, |domain| domain.contains(&value))
}
