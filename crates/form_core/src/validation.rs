use std::collections::BTreeMap;

use crate::draft::{ContractDraft, Field};

/// Field name -> single human-readable message. Rebuilt from scratch on every
/// validation pass; never merged with a previous pass.
pub type ValidationErrors = BTreeMap<Field, String>;

/// The fixed page sequence of the contract form. Each step owns the field set
/// it is responsible for validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormStep {
    BasicInfo,
    Parties,
    Financial,
    Dates,
    Documents,
    Review,
}

impl FormStep {
    pub const ALL: [FormStep; 6] = [
        FormStep::BasicInfo,
        FormStep::Parties,
        FormStep::Financial,
        FormStep::Dates,
        FormStep::Documents,
        FormStep::Review,
    ];

    /// 1-based position, matching what gets persisted with a draft.
    pub fn index(&self) -> u8 {
        match self {
            FormStep::BasicInfo => 1,
            FormStep::Parties => 2,
            FormStep::Financial => 3,
            FormStep::Dates => 4,
            FormStep::Documents => 5,
            FormStep::Review => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<FormStep> {
        FormStep::ALL.into_iter().find(|step| step.index() == index)
    }

    pub fn title(&self) -> &'static str {
        match self {
            FormStep::BasicInfo => "Basic Info",
            FormStep::Parties => "Parties & Commodity",
            FormStep::Financial => "Financial Details",
            FormStep::Dates => "Dates & Delivery",
            FormStep::Documents => "Documents",
            FormStep::Review => "Review & Submit",
        }
    }

    pub fn next(&self) -> Option<FormStep> {
        FormStep::from_index(self.index() + 1)
    }

    pub fn prev(&self) -> Option<FormStep> {
        self.index().checked_sub(1).and_then(FormStep::from_index)
    }

    pub fn fields(&self) -> &'static [Field] {
        match self {
            FormStep::BasicInfo => &[Field::Title, Field::ContractType, Field::Description],
            FormStep::Parties => &[Field::CommodityId, Field::CounterpartyId, Field::TraderId],
            FormStep::Financial => &[
                Field::Quantity,
                Field::Unit,
                Field::PricePerUnit,
                Field::Currency,
                Field::PaymentTerms,
            ],
            FormStep::Dates => &[
                Field::StartDate,
                Field::EndDate,
                Field::DeliveryDate,
                Field::DeliveryLocation,
            ],
            FormStep::Documents => &[Field::Documents],
            FormStep::Review => &[],
        }
    }
}

/// Runs the rule set for one step against the draft. Pure: no access to the
/// controller's current step and no mutation of the draft.
pub fn check_step(step: FormStep, draft: &ContractDraft) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    match step {
        FormStep::BasicInfo => {
            if draft.title.trim().is_empty() {
                errors.insert(Field::Title, "Contract title is required".to_string());
            }
            if draft.contract_type.is_none() {
                errors.insert(Field::ContractType, "Contract type is required".to_string());
            }
            if draft.description.trim().is_empty() {
                errors.insert(Field::Description, "Description is required".to_string());
            }
        }
        FormStep::Parties => {
            if draft.commodity_id.is_none() {
                errors.insert(Field::CommodityId, "Commodity is required".to_string());
            }
            if draft.counterparty_id.is_none() {
                errors.insert(Field::CounterpartyId, "Counterparty is required".to_string());
            }
            if draft.trader_id.is_none() {
                errors.insert(Field::TraderId, "Trader is required".to_string());
            }
        }
        FormStep::Financial => {
            if !draft.quantity.is_some_and(|q| q > 0.0) {
                errors.insert(Field::Quantity, "Valid quantity is required".to_string());
            }
            if draft.unit.is_none() {
                errors.insert(Field::Unit, "Unit is required".to_string());
            }
            if !draft.price_per_unit.is_some_and(|p| p > 0.0) {
                errors.insert(Field::PricePerUnit, "Valid price is required".to_string());
            }
            if draft.payment_terms.is_none() {
                errors.insert(Field::PaymentTerms, "Payment terms are required".to_string());
            }
        }
        FormStep::Dates => {
            if draft.start_date.is_none() {
                errors.insert(Field::StartDate, "Start date is required".to_string());
            }
            if draft.end_date.is_none() {
                errors.insert(Field::EndDate, "End date is required".to_string());
            }
            if draft.delivery_date.is_none() {
                errors.insert(Field::DeliveryDate, "Delivery date is required".to_string());
            }
            if draft.delivery_location.trim().is_empty() {
                errors.insert(
                    Field::DeliveryLocation,
                    "Delivery location is required".to_string(),
                );
            }
            if let (Some(start), Some(end)) = (draft.start_date, draft.end_date) {
                if end <= start {
                    errors.insert(
                        Field::EndDate,
                        "End date must be after start date".to_string(),
                    );
                }
            }
        }
        // No required fields on the documents step.
        FormStep::Documents => {}
        FormStep::Review => {
            for prior in [
                FormStep::BasicInfo,
                FormStep::Parties,
                FormStep::Financial,
                FormStep::Dates,
            ] {
                errors.extend(check_step(prior, draft));
            }
        }
    }
    errors
}

/// Union of every step's failures, used by the submit pipeline so the caller
/// sees all outstanding problems at once rather than the last failing step's.
pub fn check_all(draft: &ContractDraft) -> ValidationErrors {
    // Review is itself the union of the prior steps.
    check_step(FormStep::Review, draft)
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
