use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{
        CommodityId, ContractStatus, ContractType, CounterpartyId, Currency, DocumentId,
        PaymentTerms, TraderId, Unit,
    },
    protocol::{Contract, ContractPayload},
};

/// Form field identifiers. Validation errors are keyed by these, and a patch
/// reports which of them it touched so the controller can drop stale errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Title,
    Description,
    ContractType,
    CommodityId,
    CounterpartyId,
    TraderId,
    Quantity,
    Unit,
    PricePerUnit,
    Currency,
    PaymentTerms,
    SpecialTerms,
    StartDate,
    EndDate,
    DeliveryDate,
    DeliveryLocation,
    DeliveryTerms,
    DeliveryInstructions,
    Documents,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::ContractType => "contract_type",
            Field::CommodityId => "commodity_id",
            Field::CounterpartyId => "counterparty_id",
            Field::TraderId => "trader_id",
            Field::Quantity => "quantity",
            Field::Unit => "unit",
            Field::PricePerUnit => "price_per_unit",
            Field::Currency => "currency",
            Field::PaymentTerms => "payment_terms",
            Field::SpecialTerms => "special_terms",
            Field::StartDate => "start_date",
            Field::EndDate => "end_date",
            Field::DeliveryDate => "delivery_date",
            Field::DeliveryLocation => "delivery_location",
            Field::DeliveryTerms => "delivery_terms",
            Field::DeliveryInstructions => "delivery_instructions",
            Field::Documents => "documents",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field assignment, the unit of `update_fields`. Overlapping
/// assignments in one batch are applied in order, last write wins.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Title(String),
    Description(String),
    ContractType(Option<ContractType>),
    CommodityId(Option<CommodityId>),
    CounterpartyId(Option<CounterpartyId>),
    TraderId(Option<TraderId>),
    Quantity(Option<f64>),
    Unit(Option<Unit>),
    PricePerUnit(Option<f64>),
    Currency(Currency),
    PaymentTerms(Option<PaymentTerms>),
    SpecialTerms(String),
    StartDate(Option<NaiveDate>),
    EndDate(Option<NaiveDate>),
    DeliveryDate(Option<NaiveDate>),
    DeliveryLocation(String),
    DeliveryTerms(String),
    DeliveryInstructions(String),
    /// Replaces the document list wholesale; the list is never deep-merged.
    Documents(Vec<DocumentMeta>),
}

impl FieldUpdate {
    pub fn field(&self) -> Field {
        match self {
            FieldUpdate::Title(_) => Field::Title,
            FieldUpdate::Description(_) => Field::Description,
            FieldUpdate::ContractType(_) => Field::ContractType,
            FieldUpdate::CommodityId(_) => Field::CommodityId,
            FieldUpdate::CounterpartyId(_) => Field::CounterpartyId,
            FieldUpdate::TraderId(_) => Field::TraderId,
            FieldUpdate::Quantity(_) => Field::Quantity,
            FieldUpdate::Unit(_) => Field::Unit,
            FieldUpdate::PricePerUnit(_) => Field::PricePerUnit,
            FieldUpdate::Currency(_) => Field::Currency,
            FieldUpdate::PaymentTerms(_) => Field::PaymentTerms,
            FieldUpdate::SpecialTerms(_) => Field::SpecialTerms,
            FieldUpdate::StartDate(_) => Field::StartDate,
            FieldUpdate::EndDate(_) => Field::EndDate,
            FieldUpdate::DeliveryDate(_) => Field::DeliveryDate,
            FieldUpdate::DeliveryLocation(_) => Field::DeliveryLocation,
            FieldUpdate::DeliveryTerms(_) => Field::DeliveryTerms,
            FieldUpdate::DeliveryInstructions(_) => Field::DeliveryInstructions,
            FieldUpdate::Documents(_) => Field::Documents,
        }
    }
}

/// Metadata for a file attached on the Documents step. The raw bytes exist
/// only in memory for the eventual upload; they are never written to the
/// draft store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub name: String,
    pub size_label: String,
    pub type_label: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip)]
    pub raw: Option<Vec<u8>>,
}

impl DocumentMeta {
    pub fn from_bytes(name: impl Into<String>, mime_type: Option<&str>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let type_label = mime_type
            .map(str::to_string)
            .or_else(|| file_extension(&name).map(str::to_uppercase))
            .unwrap_or_else(|| "FILE".to_string());
        Self {
            id: DocumentId::new(),
            size_label: format_file_size(bytes.len() as u64),
            type_label,
            uploaded_at: Utc::now(),
            raw: Some(bytes),
            name,
        }
    }
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let exp = (bytes as f64).log(1024.0).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exp as i32);
    if exp == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[exp])
    }
}

fn file_extension(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// The form's working state. Created empty when a controller is built (or
/// populated from an existing contract when editing), mutated only through
/// `update_fields`, serialized to the draft store minus raw file bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDraft {
    pub title: String,
    pub description: String,
    pub contract_type: Option<ContractType>,
    pub commodity_id: Option<CommodityId>,
    pub counterparty_id: Option<CounterpartyId>,
    pub trader_id: Option<TraderId>,
    pub quantity: Option<f64>,
    pub unit: Option<Unit>,
    pub price_per_unit: Option<f64>,
    pub currency: Currency,
    /// Derived: `quantity * price_per_unit`, recomputed on every change to
    /// either factor. Never assigned directly.
    pub total_value: f64,
    pub payment_terms: Option<PaymentTerms>,
    pub special_terms: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_location: String,
    pub delivery_terms: String,
    pub delivery_instructions: String,
    pub documents: Vec<DocumentMeta>,
}

impl Default for ContractDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            contract_type: None,
            commodity_id: None,
            counterparty_id: None,
            trader_id: None,
            quantity: None,
            unit: None,
            price_per_unit: None,
            currency: Currency::default(),
            total_value: 0.0,
            payment_terms: None,
            special_terms: String::new(),
            start_date: None,
            end_date: None,
            delivery_date: None,
            delivery_location: String::new(),
            delivery_terms: String::new(),
            delivery_instructions: String::new(),
            documents: Vec::new(),
        }
    }
}

impl ContractDraft {
    pub fn apply(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::Title(v) => self.title = v,
            FieldUpdate::Description(v) => self.description = v,
            FieldUpdate::ContractType(v) => self.contract_type = v,
            FieldUpdate::CommodityId(v) => self.commodity_id = v,
            FieldUpdate::CounterpartyId(v) => self.counterparty_id = v,
            FieldUpdate::TraderId(v) => self.trader_id = v,
            FieldUpdate::Quantity(v) => self.quantity = v,
            FieldUpdate::Unit(v) => self.unit = v,
            FieldUpdate::PricePerUnit(v) => self.price_per_unit = v,
            FieldUpdate::Currency(v) => self.currency = v,
            FieldUpdate::PaymentTerms(v) => self.payment_terms = v,
            FieldUpdate::SpecialTerms(v) => self.special_terms = v,
            FieldUpdate::StartDate(v) => self.start_date = v,
            FieldUpdate::EndDate(v) => self.end_date = v,
            FieldUpdate::DeliveryDate(v) => self.delivery_date = v,
            FieldUpdate::DeliveryLocation(v) => self.delivery_location = v,
            FieldUpdate::DeliveryTerms(v) => self.delivery_terms = v,
            FieldUpdate::DeliveryInstructions(v) => self.delivery_instructions = v,
            FieldUpdate::Documents(v) => self.documents = v,
        }
        self.total_value = self.computed_total();
    }

    pub fn computed_total(&self) -> f64 {
        self.quantity.unwrap_or(0.0) * self.price_per_unit.unwrap_or(0.0)
    }

    /// True when the draft carries enough identifying content to be worth
    /// autosaving: a title, a description, or a selected commodity.
    pub fn has_identifying_content(&self) -> bool {
        !self.title.trim().is_empty()
            || !self.description.trim().is_empty()
            || self.commodity_id.is_some()
    }

    /// Maps the draft into the backend payload shape. Returns `None` when a
    /// required field is unset; callers validate before mapping, so `None`
    /// here means the submit pipeline has a bug.
    pub fn to_payload(&self) -> Option<ContractPayload> {
        Some(ContractPayload {
            title: self.title.clone(),
            description: self.description.clone(),
            contract_type: self.contract_type?,
            commodity_id: self.commodity_id?,
            counterparty_id: self.counterparty_id?,
            trader_id: self.trader_id?,
            quantity: self.quantity?,
            unit: self.unit?,
            price_per_unit: self.price_per_unit?,
            total_value: self.computed_total(),
            currency: self.currency,
            payment_terms: self.payment_terms?,
            special_terms: self.special_terms.clone(),
            start_date: self.start_date?,
            end_date: self.end_date?,
            delivery_date: self.delivery_date?,
            delivery_location: self.delivery_location.clone(),
            delivery_terms: self.delivery_terms.clone(),
            delivery_instructions: self.delivery_instructions.clone(),
            status: ContractStatus::Draft,
        })
    }

    /// Populates a draft from a persisted contract for edit mode.
    pub fn from_contract(contract: &Contract) -> Self {
        Self {
            title: contract.title.clone(),
            description: contract.description.clone(),
            contract_type: Some(contract.contract_type),
            commodity_id: Some(contract.commodity_id),
            counterparty_id: Some(contract.counterparty_id),
            trader_id: Some(contract.trader_id),
            quantity: Some(contract.quantity),
            unit: Some(contract.unit),
            price_per_unit: Some(contract.price_per_unit),
            currency: contract.currency,
            total_value: contract.quantity * contract.price_per_unit,
            payment_terms: Some(contract.payment_terms),
            special_terms: contract.special_terms.clone(),
            start_date: Some(contract.start_date),
            end_date: Some(contract.end_date),
            delivery_date: Some(contract.delivery_date),
            delivery_location: contract.delivery_location.clone(),
            delivery_terms: contract.delivery_terms.clone(),
            delivery_instructions: contract.delivery_instructions.clone(),
            documents: Vec::new(),
        }
    }
}

/// On-disk snapshot: the draft plus the step the user was on, so a reload
/// resumes in place. Raw file bytes are dropped by the `DocumentMeta` serde
/// skip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDraft {
    #[serde(flatten)]
    pub draft: ContractDraft,
    #[serde(default = "default_step_index")]
    pub current_step: u8,
}

fn default_step_index() -> u8 {
    1
}

#[cfg(test)]
#[path = "tests/draft_tests.rs"]
mod tests;
