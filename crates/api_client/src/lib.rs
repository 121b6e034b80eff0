use anyhow::Result;
use async_trait::async_trait;
use form_core::{ContractBackend, ReferenceDataProvider};
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::ContractId,
    error::{ApiError, ErrorCode},
    protocol::{Commodity, Contract, ContractPayload, Counterparty, Trader},
};
use tracing::debug;

/// HTTP client for the contract CRM backend. Implements both collaborator
/// traits the form controller needs, so one instance serves as reference data
/// source and submission target.
#[derive(Clone)]
pub struct ContractApiClient {
    http: Client,
    base_url: String,
}

impl ContractApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_list<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        debug!(path, "fetching reference list");
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ReferenceDataProvider for ContractApiClient {
    async fn commodities(&self) -> Result<Vec<Commodity>> {
        self.fetch_list("/api/commodities/").await
    }

    async fn counterparties(&self) -> Result<Vec<Counterparty>> {
        self.fetch_list("/api/counterparties/").await
    }

    async fn traders(&self) -> Result<Vec<Trader>> {
        self.fetch_list("/api/traders/").await
    }
}

#[async_trait]
impl ContractBackend for ContractApiClient {
    async fn create_contract(&self, payload: ContractPayload) -> Result<Contract, ApiError> {
        let response = self
            .http
            .post(format!("{}/api/contracts/", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        decode_contract(response).await
    }

    async fn update_contract(
        &self,
        id: ContractId,
        payload: ContractPayload,
    ) -> Result<Contract, ApiError> {
        let response = self
            .http
            .put(format!("{}/api/contracts/{}/", self.base_url, id.0))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        decode_contract(response).await
    }

    async fn get_contract(&self, id: ContractId) -> Result<Contract, ApiError> {
        let response = self
            .http
            .get(format!("{}/api/contracts/{}/", self.base_url, id.0))
            .send()
            .await
            .map_err(transport)?;
        decode_contract(response).await
    }
}

/// Reads a contract out of a 2xx response, or the backend's error body out of
/// anything else. Backends that fail without a structured body still produce
/// a usable message.
async fn decode_contract(response: Response) -> Result<Contract, ApiError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<Contract>().await.map_err(|err| {
            ApiError::new(
                ErrorCode::Internal,
                format!("malformed contract response: {err}"),
            )
        });
    }

    let body = response.text().await.unwrap_or_default();
    if let Ok(err) = serde_json::from_str::<ApiError>(&body) {
        return Err(err);
    }
    let message = if body.trim().is_empty() {
        format!("contract API returned {status}")
    } else {
        body
    };
    Err(ApiError::new(code_for_status(status), message))
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::new(
        ErrorCode::Internal,
        format!("contract API unreachable: {err}"),
    )
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
