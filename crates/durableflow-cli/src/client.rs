// HTTP client wrapper for the Durableflow API

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Exit codes mirroring the API's six-member error taxonomy.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_NOT_FOUND: i32 = 1;
pub const EXIT_PRECONDITION_FAILED: i32 = 2;
pub const EXIT_WORKFLOW_FAILED: i32 = 3;
pub const EXIT_TRANSIENT: i32 = 4;
pub const EXIT_INVALID_ARGUMENT: i32 = 5;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found")]
    NotFound,
}

impl ClientError {
    /// Map this error onto the process exit code the caller should use.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::NotFound => EXIT_NOT_FOUND,
            ClientError::Http(_) => EXIT_TRANSIENT,
            ClientError::Api { status, .. } => match *status {
                400 => EXIT_INVALID_ARGUMENT,
                404 => EXIT_NOT_FOUND,
                409 => EXIT_PRECONDITION_FAILED,
                422 => EXIT_WORKFLOW_FAILED,
                503 | 504 => EXIT_TRANSIENT,
                _ => EXIT_INVALID_ARGUMENT,
            },
        }
    }
}

/// Top-level command error: either a failed API call (carries a precise
/// exit code) or a local usage/parsing problem (treated as an invalid
/// argument).
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Client(e) => e.exit_code(),
            CliError::Other(_) => EXIT_INVALID_ARGUMENT,
        }
    }
}

pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        self.handle_response(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        self.handle_response(response).await
    }

    /// POST with no meaningful response body (cancel/terminate/signal).
    pub async fn post_empty<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        self.check_status(response).await?;
        Ok(())
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        let message = error_message(response).await;
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }

        if !status.is_success() {
            let message = error_message(response).await;
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}

/// Pull `message` out of the API's `{"error": ..., "message": ...}` body,
/// falling back to the raw response text.
async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(text)
}
