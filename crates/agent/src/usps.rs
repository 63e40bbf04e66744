//! USPS address check
//!
//! Standardizes a parsed address through the USPS Addresses v3 API and
//! rejects addresses the post office cannot deliver to. The OAuth token is
//! cached until shortly before it expires. When the API is unreachable the
//! local ZIP table check is used instead.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use intake_config::AddressProviderConfig;
use intake_core::ValidationError;

use crate::intake::Address;
use crate::validate::{AddressValidator, RuleBasedAddressValidator};
use crate::AgentError;

/// Refresh this long before the token's stated expiry
const TOKEN_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: u64 = 3599;

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddressResponse {
    #[serde(default)]
    address: Option<StandardAddress>,
    #[serde(default)]
    address_additional_info: Option<AdditionalInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StandardAddress {
    #[serde(default)]
    street_address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default, rename = "ZIPCode")]
    zip_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AdditionalInfo {
    #[serde(default, rename = "DPVConfirmation")]
    dpv_confirmation: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Why a lookup did not produce a verdict
#[derive(Debug, thiserror::Error)]
enum LookupError {
    #[error("USPS rejected the access token")]
    Unauthorized,
    #[error("USPS unavailable: {0}")]
    Unavailable(String),
}

pub struct UspsAddressValidator {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
    fallback: RuleBasedAddressValidator,
}

impl UspsAddressValidator {
    pub fn new(config: &AddressProviderConfig) -> Result<Self, AgentError> {
        let (Some(client_id), Some(client_secret)) = (&config.client_id, &config.client_secret) else {
            return Err(AgentError::Provider(
                "providers.address.client_id and client_secret are required".to_string(),
            ));
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            token: Mutex::new(None),
            fallback: RuleBasedAddressValidator::new(),
        })
    }

    /// Cached token, fetching a new one when missing or about to expire.
    /// The lock is held across the fetch so concurrent calls share one.
    async fn access_token(&self) -> Result<String, LookupError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("Fetching USPS access token");
        let response = self
            .client
            .post(format!("{}/oauth2/v3/token", self.base_url))
            .json(&TokenRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                grant_type: "client_credentials",
            })
            .send()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            *cached = None;
            return Err(LookupError::Unavailable(format!("token request returned {}", status)));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_MARGIN),
        });
        tracing::info!(expires_in = lifetime.as_secs(), "Obtained USPS access token");
        Ok(token.access_token)
    }

    async fn lookup(&self, address: &Address) -> Result<Result<Address, ValidationError>, LookupError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/addresses/v3/address", self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("streetAddress", address.street.as_str()),
                ("city", address.city.as_str()),
                ("state", address.state.as_str()),
                ("ZIPCode", address.postal_code.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let body: AddressResponse = response
                    .json()
                    .await
                    .map_err(|e| LookupError::Unavailable(e.to_string()))?;
                Ok(interpret(address.clone(), body))
            }
            reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::NOT_FOUND => {
                tracing::info!(zip = %address.postal_code, "USPS could not find the address");
                Ok(Err(ValidationError::AddressUndeliverable))
            }
            reqwest::StatusCode::UNAUTHORIZED => {
                *self.token.lock().await = None;
                Err(LookupError::Unauthorized)
            }
            status => Err(LookupError::Unavailable(format!("address request returned {}", status))),
        }
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Verdict from a USPS response. Delivery point confirmation "Y" is fully
/// confirmed; "S" and "D" are deliverable with a missing unit or number;
/// "N" is undeliverable.
pub(crate) fn interpret(mut address: Address, body: AddressResponse) -> Result<Address, ValidationError> {
    let dpv = body
        .address_additional_info
        .and_then(|info| info.dpv_confirmation)
        .unwrap_or_else(|| "N".to_string());
    if dpv == "N" {
        return Err(ValidationError::AddressUndeliverable);
    }

    if let Some(standard) = body.address {
        if let Some(street) = standard.street_address.filter(|s| !s.trim().is_empty()) {
            address.street = title_case(&street);
        }
        if let Some(city) = standard.city.filter(|s| !s.trim().is_empty()) {
            address.city = title_case(&city);
        }
        if let Some(state) = standard.state.filter(|s| !s.trim().is_empty()) {
            address.state = state.to_uppercase();
        }
        if let Some(zip) = standard.zip_code.filter(|s| !s.trim().is_empty()) {
            address.postal_code = zip;
        }
    }

    address.street_validated = dpv == "Y" || dpv == "S";
    address.city_validated = true;
    address.state_validated = true;
    address.postal_code_validated = true;
    if dpv != "Y" {
        tracing::info!(dpv = %dpv, "USPS confirmed the address with a missing unit or number");
    }
    Ok(address)
}

#[async_trait::async_trait]
impl AddressValidator for UspsAddressValidator {
    async fn validate(&self, address: Address) -> Result<Address, ValidationError> {
        match self.lookup(&address).await {
            Ok(verdict) => verdict,
            Err(error) => {
                tracing::warn!(error = %error, "USPS lookup failed, using local ZIP check");
                metrics::counter!("intake_agent_errors_total", "kind" => "address_api").increment(1);
                self.fallback.validate(address).await
            }
        }
    }
}
