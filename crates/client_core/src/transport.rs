//! HTTP+JSON implementation of every collaborator against a single gateway.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{DocumentId, SessionId, SuggestionLabel, UnitId},
    error::{ApiError, ApiException},
    protocol::{
        AnalysisRequest, AnalysisResult, ApplyChoiceRequest, SaveDraftRequest, SentenceUnit,
        Session, SessionConfig, StartSessionRequest, SuggestionContext, SuggestionRequest,
        SuggestionSet, ValidateCustomRequest, ValidationResult,
    },
};
use url::Url;

use crate::services::{
    AnalysisService, DraftPersistence, SessionService, SuggestionService, ValidationService,
};

pub struct HttpServices {
    http: Client,
    base_url: Url,
}

impl HttpServices {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("invalid service url: {base_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("service url must start with http:// or https://"));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path: {path}"))
    }

    async fn post_session_action(&self, session_id: SessionId, action: &str) -> Result<Session> {
        let url = self.endpoint(&format!("sessions/{}/{action}", session_id.0))?;
        decode(self.http.post(url).send().await?).await
    }
}

/// Decode a success body as `T`; error bodies become [`ApiException`]s when the
/// service sent an [`ApiError`].
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check(response).await?;
    Ok(response.json().await?)
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(ApiException::from(api_error).into()),
        Err(_) => Err(anyhow!("request failed with status {status}: {body}")),
    }
}

#[async_trait]
impl SessionService for HttpServices {
    async fn start(&self, document_id: DocumentId, config: &SessionConfig) -> Result<Session> {
        let response = self
            .http
            .post(self.endpoint("sessions")?)
            .json(&StartSessionRequest {
                document_id,
                config: config.clone(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn get_current(&self, session_id: SessionId) -> Result<Session> {
        let url = self.endpoint(&format!("sessions/{}", session_id.0))?;
        decode(self.http.get(url).send().await?).await
    }

    async fn advance(&self, session_id: SessionId) -> Result<Session> {
        self.post_session_action(session_id, "advance").await
    }

    async fn skip(&self, session_id: SessionId) -> Result<Session> {
        self.post_session_action(session_id, "skip").await
    }

    async fn flag(&self, session_id: SessionId) -> Result<Session> {
        self.post_session_action(session_id, "flag").await
    }

    async fn apply_choice(
        &self,
        session_id: SessionId,
        unit_id: UnitId,
        label: SuggestionLabel,
        text: &str,
    ) -> Result<()> {
        let url = self.endpoint(&format!("sessions/{}/choices", session_id.0))?;
        let response = self
            .http
            .post(url)
            .json(&ApplyChoiceRequest {
                unit_id,
                label,
                text: text.to_string(),
            })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn complete(&self, session_id: SessionId) -> Result<()> {
        let url = self.endpoint(&format!("sessions/{}/complete", session_id.0))?;
        check(self.http.post(url).send().await?).await?;
        Ok(())
    }

    async fn list_units(&self, session_id: SessionId) -> Result<Vec<SentenceUnit>> {
        let url = self.endpoint(&format!("sessions/{}/units", session_id.0))?;
        decode(self.http.get(url).send().await?).await
    }
}

#[async_trait]
impl SuggestionService for HttpServices {
    async fn get_suggestions(
        &self,
        unit_text: &str,
        context: &SuggestionContext,
    ) -> Result<SuggestionSet> {
        let response = self
            .http
            .post(self.endpoint("suggestions")?)
            .json(&SuggestionRequest {
                text: unit_text.to_string(),
                context: context.clone(),
            })
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl ValidationService for HttpServices {
    async fn validate_custom(
        &self,
        session_id: SessionId,
        unit_id: UnitId,
        draft_text: &str,
    ) -> Result<ValidationResult> {
        let url = self.endpoint(&format!(
            "sessions/{}/units/{}/validate",
            session_id.0, unit_id.0
        ))?;
        let response = self
            .http
            .post(url)
            .json(&ValidateCustomRequest {
                draft_text: draft_text.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl AnalysisService for HttpServices {
    async fn analyze(&self, unit_text: &str) -> Result<AnalysisResult> {
        let response = self
            .http
            .post(self.endpoint("analysis")?)
            .json(&AnalysisRequest {
                text: unit_text.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl DraftPersistence for HttpServices {
    async fn save_draft(&self, session_id: SessionId, unit_id: UnitId, text: &str) -> Result<()> {
        let url = self.endpoint(&format!(
            "sessions/{}/units/{}/draft",
            session_id.0, unit_id.0
        ))?;
        let response = self
            .http
            .put(url)
            .json(&SaveDraftRequest {
                text: text.to_string(),
            })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
