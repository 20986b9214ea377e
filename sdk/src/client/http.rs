//! HTTP client implementation.
//!
//! Provides the client for the Gavel REST API: login and auction lookup.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::ClientConfig;
use super::error::ClientError;
use crate::types::{Auction, AuctionId};

/// A decoded response together with its HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    /// HTTP status code.
    pub status: u16,
    /// Decoded body.
    pub data: T,
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Collection wrapper used by the auction endpoints.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    name: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

const LOGIN_PATH: &str = "/auth/login";
const AUCTIONS_PATH: &str = "/auctions";

/// HTTP client for the Gavel REST API.
#[derive(Debug, Clone)]
pub struct AuctionClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl AuctionClient {
    /// Creates a client with the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if the settings do not
    /// validate, or [`ClientError::Transport`] if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ClientError::InvalidConfig("token is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!("gavel-sdk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self { config, http })
    }

    /// Creates a client for the local development server.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_defaults() -> Result<Self, ClientError> {
        Self::new(ClientConfig::default())
    }

    /// Creates a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not http(s).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new(base_url))
    }

    /// Returns a client for the same API that authenticates with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be sent as a header.
    pub fn with_token(&self, token: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(self.config.clone().with_token(token))
    }

    /// Returns the client settings.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ClientError> {
        let url = self.config.endpoint(path);
        self.send(path, || self.http.get(&url)).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.config.endpoint(path);
        self.send(path, || self.http.post(&url).json(body)).await
    }

    /// Sends a request, retrying timeouts, 5xx answers and rate limits.
    ///
    /// A rate limit waits for `Retry-After` when the server sends one;
    /// everything else waits for the configured backoff.
    async fn send<T, F>(&self, path: &str, request: F) -> Result<ApiResponse<T>, ClientError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let err = match self.send_once(path, &request).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = match &err {
                ClientError::RateLimited {
                    retry_after: Some(secs),
                } => Duration::from_secs(*secs),
                _ => self.config.backoff(attempt),
            };
            warn!("{} failed ({}), retry {} in {:?}", path, err, attempt, delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once<T, F>(&self, path: &str, request: &F) -> Result<ApiResponse<T>, ClientError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let response = request().send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            return Err(ClientError::RateLimited { retry_after });
        }

        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(body);
            return Err(ClientError::from_status(path, status, message));
        }

        debug!("{} answered {}", path, status);
        serde_json::from_str(&body)
            .map(|data| ApiResponse {
                status: status.as_u16(),
                data,
            })
            .map_err(|e| ClientError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// Logs in with a user name and password.
    ///
    /// Returns the bearer token issued by the server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unauthorized`] for rejected credentials and
    /// [`ClientError::MissingToken`] if the server answered without a token.
    pub async fn login(&self, name: &str, password: &str) -> Result<String, ClientError> {
        let response: ApiResponse<LoginResponse> =
            self.post(LOGIN_PATH, &LoginRequest { name, password }).await?;

        match response.data.token {
            Some(token) if response.status == 200 && !token.is_empty() => Ok(token),
            _ => Err(ClientError::MissingToken),
        }
    }

    /// Gets all auctions.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_auctions(&self) -> Result<ApiResponse<Vec<Auction>>, ClientError> {
        let response: ApiResponse<DataEnvelope<Auction>> = self.get(AUCTIONS_PATH).await?;
        Ok(ApiResponse {
            status: response.status,
            data: response.data.data,
        })
    }

    /// Gets one auction.
    ///
    /// The endpoint answers with a one-element collection; `data` is `None`
    /// when that collection is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the auction does not exist.
    pub async fn get_auction(
        &self,
        id: AuctionId,
    ) -> Result<ApiResponse<Option<Auction>>, ClientError> {
        let response: ApiResponse<DataEnvelope<Auction>> =
            self.get(&format!("{}/{}", AUCTIONS_PATH, id)).await?;
        Ok(ApiResponse {
            status: response.status,
            data: response.data.data.into_iter().next(),
        })
    }

    /// Gets the auctions a user has bid on.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn get_user_participations(
        &self,
        user_id: u64,
    ) -> Result<ApiResponse<Vec<Auction>>, ClientError> {
        let response: ApiResponse<DataEnvelope<Auction>> = self
            .get(&format!("{}/user/{}/participations", AUCTIONS_PATH, user_id))
            .await?;
        Ok(ApiResponse {
            status: response.status,
            data: response.data.data,
        })
    }
}
