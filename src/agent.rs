use crate::credentials::TokenStore;
use crate::errors::{AppError, AppResult};
use crate::models::{ActivitiesEnvelope, ActivityDto};
use crate::query::ListQuery;
use crate::redaction::redact_secrets;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Remote activity endpoints. Implementations map failures onto the
/// `AppError` taxonomy.
#[async_trait]
pub trait ActivitiesApi: Send + Sync {
    async fn list(&self, query: &ListQuery) -> AppResult<ActivitiesEnvelope>;
    async fn details(&self, id: &str) -> AppResult<ActivityDto>;
    async fn create(&self, activity: &ActivityDto) -> AppResult<()>;
    async fn update(&self, activity: &ActivityDto) -> AppResult<()>;
    async fn delete(&self, id: &str) -> AppResult<()>;
    async fn attend(&self, id: &str) -> AppResult<()>;
    async fn unattend(&self, id: &str) -> AppResult<()>;
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchanges an access/refresh token pair for a new access token.
    async fn refresh_token(&self, access_token: &str, refresh_token: &str) -> AppResult<String>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    token: &'a str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    token: String,
}

/// reqwest client for the activities REST API.
pub struct HttpAgent {
    base_url: String,
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
}

impl HttpAgent {
    pub fn new(base_url: &str, request_timeout: Duration, tokens: Arc<dyn TokenStore>) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("activity-client-core/0.1")
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build http client: {}", error)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, self.url(path));
        match self.tokens.load_tokens() {
            Ok(tokens) => match tokens.access_token {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            },
            Err(error) => {
                tracing::warn!(error = %error, "failed to read access token for request");
                builder
            }
        }
    }

    async fn send(&self, builder: RequestBuilder) -> AppResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

fn status_error(status: StatusCode, body: &str) -> AppError {
    let detail = redact_secrets(body.trim());
    let detail = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, detail)
    };
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::ValidationRejected(detail),
        StatusCode::UNAUTHORIZED => AppError::AuthExpired(detail),
        StatusCode::NOT_FOUND => AppError::NotFound(detail),
        _ => AppError::Transport(detail),
    }
}

#[async_trait]
impl ActivitiesApi for HttpAgent {
    async fn list(&self, query: &ListQuery) -> AppResult<ActivitiesEnvelope> {
        let builder = self.request(Method::GET, "activities").query(&query.to_params());
        Ok(self.send(builder).await?.json().await?)
    }

    async fn details(&self, id: &str) -> AppResult<ActivityDto> {
        let builder = self.request(Method::GET, &format!("activities/{}", id));
        Ok(self.send(builder).await?.json().await?)
    }

    async fn create(&self, activity: &ActivityDto) -> AppResult<()> {
        let builder = self.request(Method::POST, "activities").json(activity);
        self.send(builder).await?;
        Ok(())
    }

    async fn update(&self, activity: &ActivityDto) -> AppResult<()> {
        let builder = self
            .request(Method::PUT, &format!("activities/{}", activity.id))
            .json(activity);
        self.send(builder).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.send(self.request(Method::DELETE, &format!("activities/{}", id))).await?;
        Ok(())
    }

    async fn attend(&self, id: &str) -> AppResult<()> {
        self.send(self.request(Method::POST, &format!("activities/{}/attend", id))).await?;
        Ok(())
    }

    async fn unattend(&self, id: &str) -> AppResult<()> {
        self.send(self.request(Method::DELETE, &format!("activities/{}/attend", id))).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthApi for HttpAgent {
    async fn refresh_token(&self, access_token: &str, refresh_token: &str) -> AppResult<String> {
        let builder = self
            .http_client
            .post(self.url("user/refresh"))
            .json(&RefreshRequest {
                token: access_token,
                refresh_token,
            });
        let refreshed: RefreshResponse = self.send(builder).await?.json().await?;
        Ok(refreshed.token)
    }
}
