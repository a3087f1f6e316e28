use std::net::SocketAddr;

use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tiny_http::{Response, Server};
use tracing::{debug, info, instrument, warn};

use crate::store::StoreError;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const FITNESS_SCOPES: &str = "https://www.googleapis.com/auth/fitness.nutrition.read https://www.googleapis.com/auth/fitness.nutrition.write";

/// Access tokens are treated as expired this many seconds early.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Tokens and Fit data stream persisted between sessions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,

    /// Unix timestamp (seconds) after which `access_token` is no longer valid
    pub expires_at: i64,

    pub data_stream_id: Option<String>,
}

impl Credentials {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() + EXPIRY_LEEWAY_SECS >= self.expires_at
    }
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Tokens freshly issued by the token endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Utc::now().timestamp() + response.expires_in,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_url: Url,
    token_url: Url,
}

impl OAuthClient {
    pub fn new(
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_url: Url,
        token_url: Url,
    ) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url,
            token_url,
        }
    }

    pub fn consent_url(&self, redirect_uri: &str) -> Url {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", FITNESS_SCOPES)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url
    }

    #[instrument(skip_all)]
    pub async fn exchange_code_with_tokens(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, StoreError> {
        self.request_token(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    #[instrument(skip_all)]
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, StoreError> {
        self.request_token(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenGrant, StoreError> {
        let response = self
            .http
            .post(self.token_url.clone())
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Token endpoint rejected request: {status}");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| StoreError::Decode(format!("token response: {e}")))?;

        Ok(token.into())
    }
}

/// What the browser handed back on the redirect URI.
#[derive(Debug, PartialEq, Eq)]
pub enum RedirectOutcome {
    Code(String),
    Denied(String),
    NotARedirect,
    MissingCode,
}

/// Interprets the request target of a hit on the redirect server.
pub fn parse_redirect(request_url: &str) -> RedirectOutcome {
    if !request_url.starts_with("/?") {
        return RedirectOutcome::NotARedirect;
    }

    let Ok(url) = Url::parse(&format!("http://localhost{request_url}")) else {
        return RedirectOutcome::MissingCode;
    };

    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => return RedirectOutcome::Code(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match error {
        Some(reason) => RedirectOutcome::Denied(reason),
        None => RedirectOutcome::MissingCode,
    }
}

/// Loopback HTTP server receiving the OAuth redirect.
pub struct RedirectServer {
    server: Server,
    addr: SocketAddr,
}

impl RedirectServer {
    pub fn bind(port: u16) -> Result<Self, StoreError> {
        let server = Server::http(("127.0.0.1", port))
            .map_err(|e| StoreError::OAuth(format!("unable to listen on port {port}: {e}")))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| StoreError::OAuth("redirect server has no IP address".to_string()))?;

        info!("Redirect server now listening on {addr}");
        Ok(Self { server, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serves requests until one carries an authorization code or a denial.
    pub async fn wait_for_code(self) -> Result<String, StoreError> {
        tokio::task::spawn_blocking(move || self.serve())
            .await
            .map_err(|e| StoreError::OAuth(format!("redirect server stopped: {e}")))?
    }

    fn serve(self) -> Result<String, StoreError> {
        let outcome = loop {
            let request = self
                .server
                .recv()
                .map_err(|e| StoreError::OAuth(format!("redirect server failed: {e}")))?;
            debug!("Received request: {}", request.url());

            match parse_redirect(request.url()) {
                RedirectOutcome::NotARedirect => {
                    request
                        .respond(Response::from_string("404 Not Found").with_status_code(404))
                        .ok();
                }
                RedirectOutcome::MissingCode => {
                    request
                        .respond(Response::from_string("400 Bad Request").with_status_code(400))
                        .ok();
                }
                RedirectOutcome::Code(code) => {
                    request
                        .respond(Response::from_string("Completed! You may close this window"))
                        .ok();
                    break Ok(code);
                }
                RedirectOutcome::Denied(reason) => {
                    request
                        .respond(Response::from_string(
                            "Access was not granted. You may close this window",
                        ))
                        .ok();
                    break Err(StoreError::AuthorizationDenied(reason));
                }
            }
        };

        info!("Shutting down redirect server");
        self.server.unblock();
        outcome
    }
}
