use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{ContractId, DocumentId},
    error::{ApiError, ErrorCode},
    protocol::{Commodity, Contract, ContractPayload, Counterparty, Trader},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod draft;
pub mod validation;

pub use draft::{ContractDraft, DocumentMeta, Field, FieldUpdate, StoredDraft};
pub use validation::{check_step, FormStep, ValidationErrors};

/// Well-known draft store key. One in-progress contract per store.
pub const DRAFT_KEY: &str = "contract_form_draft";
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Read-only lookup lists used to populate the form's dropdowns and to
/// resolve display names at review time. Loaded once per controller lifetime,
/// independently per list.
#[async_trait]
pub trait ReferenceDataProvider: Send + Sync {
    async fn commodities(&self) -> Result<Vec<Commodity>>;
    async fn counterparties(&self) -> Result<Vec<Counterparty>>;
    async fn traders(&self) -> Result<Vec<Trader>>;
}

pub struct MissingReferenceData;

#[async_trait]
impl ReferenceDataProvider for MissingReferenceData {
    async fn commodities(&self) -> Result<Vec<Commodity>> {
        Err(anyhow!("reference data provider is unavailable"))
    }

    async fn counterparties(&self) -> Result<Vec<Counterparty>> {
        Err(anyhow!("reference data provider is unavailable"))
    }

    async fn traders(&self) -> Result<Vec<Trader>> {
        Err(anyhow!("reference data provider is unavailable"))
    }
}

/// The persistence backend that owns finished contracts. Invoked once per
/// successful submission; its error messages are surfaced to the view as-is.
#[async_trait]
pub trait ContractBackend: Send + Sync {
    async fn create_contract(&self, payload: ContractPayload) -> Result<Contract, ApiError>;
    async fn update_contract(
        &self,
        id: ContractId,
        payload: ContractPayload,
    ) -> Result<Contract, ApiError>;
    async fn get_contract(&self, id: ContractId) -> Result<Contract, ApiError>;
}

pub struct MissingContractBackend;

#[async_trait]
impl ContractBackend for MissingContractBackend {
    async fn create_contract(&self, _payload: ContractPayload) -> Result<Contract, ApiError> {
        Err(ApiError::new(
            ErrorCode::Internal,
            "contract backend is unavailable",
        ))
    }

    async fn update_contract(
        &self,
        id: ContractId,
        _payload: ContractPayload,
    ) -> Result<Contract, ApiError> {
        Err(ApiError::new(
            ErrorCode::Internal,
            format!("contract backend is unavailable for contract {}", id.0),
        ))
    }

    async fn get_contract(&self, id: ContractId) -> Result<Contract, ApiError> {
        Err(ApiError::new(
            ErrorCode::Internal,
            format!("contract backend is unavailable for contract {}", id.0),
        ))
    }
}

/// Key-value store holding at most one serialized draft under [`DRAFT_KEY`].
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Non-durable store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryDraftStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceList {
    Commodities,
    Counterparties,
    Traders,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub commodities: Vec<Commodity>,
    pub counterparties: Vec<Counterparty>,
    pub traders: Vec<Trader>,
    pub loading_commodities: bool,
    pub loading_counterparties: bool,
    pub loading_traders: bool,
}

/// Notifications for the surrounding view layer.
#[derive(Debug, Clone)]
pub enum FormEvent {
    StepChanged(FormStep),
    DraftSaved,
    DraftLoaded,
    DraftCleared,
    ValidationFailed { step: FormStep },
    ReferenceDataLoaded(ReferenceList),
    Submitted { contract_id: ContractId },
    SubmissionFailed(String),
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("a draft save is already in progress")]
    SaveInFlight,
}

struct FormState {
    draft: ContractDraft,
    current_step: FormStep,
    errors: ValidationErrors,
    is_loading: bool,
    save_in_flight: bool,
    submit_in_flight: bool,
    reference: ReferenceData,
    editing: Option<ContractId>,
    last_submit_error: Option<String>,
    autosave: Option<JoinHandle<()>>,
}

impl FormState {
    fn initial() -> Self {
        Self {
            draft: ContractDraft::default(),
            current_step: FormStep::BasicInfo,
            errors: ValidationErrors::new(),
            is_loading: false,
            save_in_flight: false,
            submit_in_flight: false,
            reference: ReferenceData::default(),
            editing: None,
            last_submit_error: None,
            autosave: None,
        }
    }
}

/// Owns one in-progress contract form: the draft, the current step, the
/// validation errors and the in-flight flags. Each mounted form gets its own
/// instance; nothing is shared across controllers.
pub struct ContractFormController {
    reference_provider: Arc<dyn ReferenceDataProvider>,
    backend: Arc<dyn ContractBackend>,
    draft_store: Arc<dyn DraftStore>,
    inner: Mutex<FormState>,
    events: broadcast::Sender<FormEvent>,
}

impl ContractFormController {
    pub fn new(
        reference_provider: Arc<dyn ReferenceDataProvider>,
        backend: Arc<dyn ContractBackend>,
        draft_store: Arc<dyn DraftStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            reference_provider,
            backend,
            draft_store,
            inner: Mutex::new(FormState::initial()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FormEvent> {
        self.events.subscribe()
    }

    pub async fn draft(&self) -> ContractDraft {
        self.inner.lock().await.draft.clone()
    }

    pub async fn current_step(&self) -> FormStep {
        self.inner.lock().await.current_step
    }

    pub async fn errors(&self) -> ValidationErrors {
        self.inner.lock().await.errors.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.lock().await.is_loading
    }

    pub async fn reference_data(&self) -> ReferenceData {
        self.inner.lock().await.reference.clone()
    }

    pub async fn total_value(&self) -> f64 {
        self.inner.lock().await.draft.computed_total()
    }

    pub async fn last_submit_error(&self) -> Option<String> {
        self.inner.lock().await.last_submit_error.clone()
    }

    pub async fn editing(&self) -> Option<ContractId> {
        self.inner.lock().await.editing
    }

    /// Fetches the three lookup lists concurrently. A failed fetch is logged
    /// and leaves that list empty; the form stays usable either way.
    pub async fn load_reference_data(&self) {
        {
            let mut state = self.inner.lock().await;
            state.reference.loading_commodities = true;
            state.reference.loading_counterparties = true;
            state.reference.loading_traders = true;
        }

        let (commodities, counterparties, traders) = tokio::join!(
            self.reference_provider.commodities(),
            self.reference_provider.counterparties(),
            self.reference_provider.traders(),
        );

        let mut state = self.inner.lock().await;
        match commodities {
            Ok(list) => {
                state.reference.commodities = list;
                let _ = self
                    .events
                    .send(FormEvent::ReferenceDataLoaded(ReferenceList::Commodities));
            }
            Err(err) => warn!("failed to load commodities: {err:#}"),
        }
        state.reference.loading_commodities = false;
        match counterparties {
            Ok(list) => {
                state.reference.counterparties = list;
                let _ = self.events.send(FormEvent::ReferenceDataLoaded(
                    ReferenceList::Counterparties,
                ));
            }
            Err(err) => warn!("failed to load counterparties: {err:#}"),
        }
        state.reference.loading_counterparties = false;
        match traders {
            Ok(list) => {
                state.reference.traders = list;
                let _ = self
                    .events
                    .send(FormEvent::ReferenceDataLoaded(ReferenceList::Traders));
            }
            Err(err) => warn!("failed to load traders: {err:#}"),
        }
        state.reference.loading_traders = false;
    }

    /// Applies field assignments in call order (last write wins on overlaps)
    /// and drops any validation error for the touched fields, whether or not
    /// the new value would pass; errors reappear on the next validation pass.
    ///
    /// The one cross-field inference: selecting a commodity fills in `unit`
    /// from the commodity's default when no unit has been chosen yet.
    pub async fn update_fields(&self, updates: impl IntoIterator<Item = FieldUpdate>) {
        let mut state = self.inner.lock().await;
        for update in updates {
            state.errors.remove(&update.field());
            let commodity_changed = matches!(&update, FieldUpdate::CommodityId(Some(_)));
            state.draft.apply(update);
            if commodity_changed && state.draft.unit.is_none() {
                if let Some(commodity_id) = state.draft.commodity_id {
                    let default_unit = state
                        .reference
                        .commodities
                        .iter()
                        .find(|c| c.id == commodity_id)
                        .map(|c| c.default_unit);
                    if let Some(unit) = default_unit {
                        state.draft.unit = Some(unit);
                    }
                }
            }
        }
    }

    /// Builds metadata for an uploaded file and appends it to the draft's
    /// document list. The raw bytes stay in memory for the eventual upload;
    /// only the metadata reaches the draft store. Returns the generated id.
    pub async fn attach_document(
        &self,
        name: impl Into<String>,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> DocumentId {
        let document = DocumentMeta::from_bytes(name, mime_type, bytes);
        let id = document.id;
        let mut state = self.inner.lock().await;
        state.errors.remove(&Field::Documents);
        let mut documents = state.draft.documents.clone();
        documents.push(document);
        state.draft.apply(FieldUpdate::Documents(documents));
        id
    }

    /// Drops the attached document with the given id. Unknown ids are a
    /// no-op.
    pub async fn remove_document(&self, id: DocumentId) {
        let mut state = self.inner.lock().await;
        state.errors.remove(&Field::Documents);
        let documents = state
            .draft
            .documents
            .iter()
            .filter(|document| document.id != id)
            .cloned()
            .collect();
        state.draft.apply(FieldUpdate::Documents(documents));
    }

    /// Runs the step's rule set against the draft and replaces the error map
    /// with the failures. Pure with respect to the draft and the current
    /// step; repeated calls give the same answer.
    pub async fn validate_step(&self, step: FormStep) -> bool {
        let mut state = self.inner.lock().await;
        let errors = validation::check_step(step, &state.draft);
        let ok = errors.is_empty();
        state.errors = errors;
        drop(state);
        if !ok {
            let _ = self.events.send(FormEvent::ValidationFailed { step });
        }
        ok
    }

    pub async fn go_to_step(&self, step: FormStep) {
        let mut state = self.inner.lock().await;
        state.current_step = step;
        drop(state);
        let _ = self.events.send(FormEvent::StepChanged(step));
    }

    /// Numeric variant for callers holding a persisted 1-based index.
    /// Out-of-range indexes are ignored.
    pub async fn go_to_index(&self, index: u8) {
        if let Some(step) = FormStep::from_index(index) {
            self.go_to_step(step).await;
        }
    }

    /// Validates the current step and advances past it only when the step
    /// passes. No-op on the last step. Returns whether the form advanced.
    pub async fn next_step(&self) -> bool {
        let current = self.current_step().await;
        if !self.validate_step(current).await {
            return false;
        }
        let Some(next) = current.next() else {
            return false;
        };
        self.go_to_step(next).await;
        true
    }

    /// Steps back without validating, floored at the first step.
    pub async fn prev_step(&self) {
        let current = self.current_step().await;
        if let Some(prev) = current.prev() {
            self.go_to_step(prev).await;
        }
    }

    /// Serializes the draft (minus transient file bytes) together with the
    /// current step and writes it under [`DRAFT_KEY`], overwriting any prior
    /// snapshot. Storage failures are returned to the caller.
    pub async fn save_draft(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.lock().await;
            if state.save_in_flight {
                warn!("draft save rejected: another save is in flight");
                return Err(FormError::SaveInFlight.into());
            }
            state.save_in_flight = true;
            state.is_loading = true;
            StoredDraft {
                draft: state.draft.clone(),
                current_step: state.current_step.index(),
            }
        };

        let result = match serde_json::to_string(&snapshot).context("failed to serialize draft") {
            Ok(json) => self.draft_store.put(DRAFT_KEY, &json).await,
            Err(err) => Err(err),
        };

        let mut state = self.inner.lock().await;
        state.save_in_flight = false;
        state.is_loading = false;
        drop(state);

        match result {
            Ok(()) => {
                let _ = self.events.send(FormEvent::DraftSaved);
                Ok(())
            }
            Err(err) => {
                warn!("draft save failed: {err:#}");
                Err(err)
            }
        }
    }

    /// Restores a previously saved draft, resuming at the stored step. A
    /// missing key leaves the controller in its initial state; malformed
    /// stored content is logged and treated the same way.
    pub async fn load_draft(&self) -> Result<()> {
        {
            let mut state = self.inner.lock().await;
            state.is_loading = true;
        }

        let loaded = self.draft_store.get(DRAFT_KEY).await;

        let mut state = self.inner.lock().await;
        state.is_loading = false;
        let raw = match loaded {
            Ok(raw) => raw,
            Err(err) => return Err(err),
        };
        let Some(raw) = raw else {
            return Ok(());
        };

        match serde_json::from_str::<StoredDraft>(&raw) {
            Ok(stored) => {
                state.current_step =
                    FormStep::from_index(stored.current_step).unwrap_or(FormStep::BasicInfo);
                state.draft = stored.draft;
                state.errors.clear();
                drop(state);
                let _ = self.events.send(FormEvent::DraftLoaded);
                Ok(())
            }
            Err(err) => {
                warn!("stored draft is malformed, treating as absent: {err}");
                Ok(())
            }
        }
    }

    /// Removes the stored draft. Idempotent.
    pub async fn clear_draft(&self) -> Result<()> {
        self.draft_store.remove(DRAFT_KEY).await?;
        let _ = self.events.send(FormEvent::DraftCleared);
        Ok(())
    }

    /// Fetches an existing contract and populates the draft from it. Until
    /// the controller is rebuilt, submissions update that contract instead of
    /// creating a new one.
    pub async fn load_contract(&self, id: ContractId) -> Result<()> {
        {
            let mut state = self.inner.lock().await;
            state.is_loading = true;
        }

        let fetched = self.backend.get_contract(id).await;

        let mut state = self.inner.lock().await;
        state.is_loading = false;
        let contract = fetched.with_context(|| format!("failed to load contract {}", id.0))?;
        state.draft = ContractDraft::from_contract(&contract);
        state.editing = Some(id);
        state.errors.clear();
        Ok(())
    }

    /// Validates every step, maps the draft to the backend payload shape and
    /// invokes the backend once. On success the stored draft is cleared and
    /// the form resets to empty; on rejection the draft is preserved so the
    /// user can retry. A call while another submission is pending is ignored
    /// and reports `false`.
    pub async fn submit_contract(&self) -> Result<bool> {
        let (payload, editing) = {
            let mut state = self.inner.lock().await;
            if state.submit_in_flight {
                warn!("submit ignored: another submission is in flight");
                return Ok(false);
            }

            let errors = validation::check_all(&state.draft);
            if !errors.is_empty() {
                state.errors = errors;
                drop(state);
                let _ = self.events.send(FormEvent::ValidationFailed {
                    step: FormStep::Review,
                });
                return Ok(false);
            }

            let payload = state
                .draft
                .to_payload()
                .ok_or_else(|| anyhow!("contract payload incomplete despite passing validation"))?;
            state.submit_in_flight = true;
            state.is_loading = true;
            state.last_submit_error = None;
            (payload, state.editing)
        };

        let result = match editing {
            Some(id) => self.backend.update_contract(id, payload).await,
            None => self.backend.create_contract(payload).await,
        };

        match result {
            Ok(contract) => {
                let cleared = self.draft_store.remove(DRAFT_KEY).await;
                let mut state = self.inner.lock().await;
                state.submit_in_flight = false;
                state.is_loading = false;
                state.draft = ContractDraft::default();
                state.current_step = FormStep::BasicInfo;
                state.errors.clear();
                state.editing = None;
                drop(state);
                if let Err(err) = cleared {
                    warn!("draft cleanup after submission failed: {err:#}");
                } else {
                    let _ = self.events.send(FormEvent::DraftCleared);
                }
                info!(
                    contract_id = contract.id.0,
                    contract_number = %contract.contract_number,
                    "contract submitted"
                );
                let _ = self.events.send(FormEvent::Submitted {
                    contract_id: contract.id,
                });
                Ok(true)
            }
            Err(err) => {
                let mut state = self.inner.lock().await;
                state.submit_in_flight = false;
                state.is_loading = false;
                state.last_submit_error = Some(err.message.clone());
                drop(state);
                warn!("contract submission rejected: {err}");
                let _ = self.events.send(FormEvent::SubmissionFailed(err.message));
                Ok(false)
            }
        }
    }

    /// Saves the draft on a fixed interval while it has identifying content.
    /// Replaces any previously started autosave task. The task holds only a
    /// weak handle, so dropping the controller stops it.
    pub async fn start_autosave(self: &Arc<Self>) {
        self.start_autosave_with_interval(AUTOSAVE_INTERVAL).await;
    }

    pub async fn start_autosave_with_interval(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it so the initial
            // save happens one full interval after mount.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                let worth_saving = {
                    let state = controller.inner.lock().await;
                    state.draft.has_identifying_content()
                };
                if !worth_saving {
                    continue;
                }
                if let Err(err) = controller.save_draft().await {
                    warn!("autosave failed: {err:#}");
                }
            }
        });

        let mut state = self.inner.lock().await;
        if let Some(previous) = state.autosave.replace(task) {
            previous.abort();
        }
    }

    pub async fn stop_autosave(&self) {
        let mut state = self.inner.lock().await;
        if let Some(task) = state.autosave.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
