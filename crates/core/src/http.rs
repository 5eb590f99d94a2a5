// crates/core/src/http.rs
//! HTTP implementation of [`JobApi`] on top of `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::StreamExt;
use jobwatch_types::{CreateJobRequest, CreateJobResponse, JobId, JobStatus, JobStatusResponse};
use reqwest::{header, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::api::{ByteStream, JobApi};
use crate::config::TrackerConfig;
use crate::error::ApiError;
use crate::identity;

/// Timeout for the short request/response calls. The event stream has none.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_ID_HEADER: &str = "X-User-Id";

pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
    authorization: Option<String>,
}

impl HttpJobApi {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            user_id: user_id.into(),
            authorization: None,
        }
    }

    /// Send `Authorization: Basic base64(user:pass)` on every request.
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.authorization = Some(basic_auth_header(username, password));
        self
    }

    /// Build from config, loading (or creating) the persisted client identity.
    pub fn from_config(config: &TrackerConfig) -> Self {
        let user_id = identity::load_or_create_user_id(config.identity_path.as_deref());
        let api = Self::new(config.api_url.clone(), user_id);
        match (&config.username, &config.password) {
            (Some(user), Some(pass)) => api.with_basic_auth(user, pass),
            _ => api,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn job_url(&self, job_id: &JobId, suffix: &str) -> String {
        format!("{}/{}/{}", self.base_url, job_id, suffix)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(USER_ID_HEADER, &self.user_id);
        match &self.authorization {
            Some(auth) => builder.header(header::AUTHORIZATION, auth),
            None => builder,
        }
    }

    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response, ApiError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::transport(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        url: &str,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = self.send(url, builder.timeout(REQUEST_TIMEOUT)).await?;
        resp.json::<T>().await.map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit(&self, job_type: u32, input: &str) -> Result<JobId, ApiError> {
        let url = self.base_url.clone();
        let body = CreateJobRequest::new(job_type, input);
        let resp: CreateJobResponse = self
            .send_json(&url, self.request(Method::POST, &url).json(&body))
            .await?;
        tracing::debug!(job_id = %resp.job_id, job_type, "Create job request accepted");
        Ok(resp.job_id)
    }

    async fn query_status(&self, job_id: &JobId) -> Result<JobStatus, ApiError> {
        let url = self.job_url(job_id, "state");
        let resp: JobStatusResponse = self
            .send_json(&url, self.request(Method::GET, &url))
            .await?;
        Ok(resp.job_status)
    }

    async fn cancel(&self, job_id: &JobId) -> Result<(), ApiError> {
        let url = self.job_url(job_id, "cancel");
        let builder = self
            .request(Method::POST, &url)
            .json(&serde_json::json!({}))
            .timeout(REQUEST_TIMEOUT);
        self.send(&url, builder).await?;
        Ok(())
    }

    async fn open_stream(&self, job_id: &JobId) -> Result<ByteStream, ApiError> {
        let url = self.job_url(job_id, "connection");
        let builder = self
            .request(Method::GET, &url)
            .header(header::ACCEPT, "text/event-stream");
        let resp = self.send(&url, builder).await?;
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ApiError::Stream(e.to_string())));
        Ok(Box::pin(stream))
    }
}

fn basic_auth_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
