//! Heroku Platform API formation client.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dynoscale_core::config::API_KEY_VARS;
use dynoscale_core::{ClientFuture, ScalerConfig, ScalingClient};

use crate::error::{HerokuError, HerokuResult};

/// Production API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.heroku.com";

const ACCEPT_V3: &str = "application/vnd.heroku+json; version=3";

/// A process type's entry in an application's formation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formation {
    pub quantity: u32,
    #[serde(rename = "type")]
    pub process_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Serialize)]
struct FormationUpdate {
    quantity: u32,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Client for the formation endpoints of the Heroku Platform API.
#[derive(Clone)]
pub struct HerokuClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    process_type: String,
}

impl std::fmt::Debug for HerokuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HerokuClient")
            .field("base_url", &self.base_url)
            .field("process_type", &self.process_type)
            .finish_non_exhaustive()
    }
}

impl HerokuClient {
    /// Create a client authenticating with `token`.
    pub fn new(token: impl Into<String>) -> HerokuResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(HerokuError::MissingToken);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_V3));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("dynoscale/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
            process_type: "worker".to_string(),
        })
    }

    /// Create a client from `HEROKU_API_KEY` or `HEROKU_OAUTH_TOKEN`.
    pub fn from_env() -> HerokuResult<Self> {
        let token = API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or(HerokuError::MissingToken)?;
        Self::new(token)
    }

    /// Create a client from the environment token that scales the
    /// configured process type.
    pub fn from_config(config: &ScalerConfig) -> HerokuResult<Self> {
        Ok(Self::from_env()?.with_process_type(config.process_type.clone()))
    }

    /// Point the client at another API endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Scale a process type other than `worker`.
    pub fn with_process_type(mut self, process_type: impl Into<String>) -> Self {
        self.process_type = process_type.into();
        self
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    fn formation_url(&self, application: &str) -> String {
        format!(
            "{}/apps/{}/formation/{}",
            self.base_url, application, self.process_type
        )
    }

    /// Set the formation quantity for the configured process type.
    pub async fn update_formation(
        &self,
        application: &str,
        quantity: u32,
    ) -> HerokuResult<Formation> {
        let url = self.formation_url(application);
        debug!(%url, quantity, "updating formation");

        let resp = self
            .http
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&FormationUpdate { quantity })
            .send()
            .await?;
        let formation: Formation = check_status(resp).await?.json().await?;

        info!(
            application,
            process_type = %formation.process_type,
            quantity = formation.quantity,
            "formation updated"
        );
        Ok(formation)
    }

    /// Fetch the formation entry for the configured process type.
    pub async fn formation(&self, application: &str) -> HerokuResult<Formation> {
        let url = self.formation_url(application);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }
}

/// Turn a non-2xx response into [`HerokuError::Status`].
async fn check_status(resp: reqwest::Response) -> HerokuResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(HerokuError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Extract the `message` field of a Heroku error body, falling back to the
/// raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

impl ScalingClient for HerokuClient {
    fn scale_workers<'a>(&'a self, application: &'a str, quantity: u32) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.update_formation(application, quantity).await?;
            Ok(())
        })
    }

    fn running_workers<'a>(&'a self, application: &'a str) -> ClientFuture<'a, u32> {
        Box::pin(async move { Ok(self.formation(application).await?.quantity) })
    }
}
