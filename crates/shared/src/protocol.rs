use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CommodityId, ContractId, ContractStatus, ContractType, CounterpartyId, Currency, PaymentTerms,
    TraderId, Unit,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commodity {
    pub id: CommodityId,
    pub name: String,
    pub category: String,
    pub default_unit: Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterparty {
    pub id: CounterpartyId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trader {
    pub id: TraderId,
    pub name: String,
    pub email: String,
}

/// Body of a contract create/update call. Field names are the backend's
/// (snake_case ids, `total_value`, `status`); the form's working state is
/// mapped into this shape at the submission boundary and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractPayload {
    pub title: String,
    pub description: String,
    pub contract_type: ContractType,
    pub commodity_id: CommodityId,
    pub counterparty_id: CounterpartyId,
    pub trader_id: TraderId,
    pub quantity: f64,
    pub unit: Unit,
    pub price_per_unit: f64,
    pub total_value: f64,
    pub currency: Currency,
    pub payment_terms: PaymentTerms,
    #[serde(default)]
    pub special_terms: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub delivery_date: NaiveDate,
    pub delivery_location: String,
    #[serde(default)]
    pub delivery_terms: String,
    #[serde(default)]
    pub delivery_instructions: String,
    pub status: ContractStatus,
}

/// Persisted contract record as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub contract_number: String,
    pub title: String,
    pub description: String,
    pub contract_type: ContractType,
    pub commodity_id: CommodityId,
    pub counterparty_id: CounterpartyId,
    pub trader_id: TraderId,
    pub quantity: f64,
    pub unit: Unit,
    pub price_per_unit: f64,
    pub total_value: f64,
    pub currency: Currency,
    pub payment_terms: PaymentTerms,
    #[serde(default)]
    pub special_terms: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub delivery_date: NaiveDate,
    pub delivery_location: String,
    #[serde(default)]
    pub delivery_terms: String,
    #[serde(default)]
    pub delivery_instructions: String,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
