use crate::{
    error::BusError,
    http_client::{base_url, transport_error},
};
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};

#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bearer token handed out by the control API
///
/// Expiry is not tracked; a caller that sees `AuthError` on later calls
/// has to authenticate again.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub token: String,
    pub obtained_at: SystemTime,
}

impl Session {
    /// Value for the `Authorization` header of subsequent requests
    pub fn authorization(&self) -> String {
        format!("bearer {}", self.token)
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    #[serde(rename = "sessionID")]
    session_id: Option<String>,
}

#[derive(Clone)]
pub struct SessionClient {
    client: Client,
}

impl SessionClient {
    const SESSION_ENDPOINT: &str = "/session";

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Request a session token from the control API
    ///
    /// # Arguments
    /// * `endpoint` - Base url of the control API, e.g. `http://192.168.1.1:8080`
    /// * `credentials` - Username and password
    ///
    /// # Returns
    /// The session, `AuthError` on a non-2xx response or a payload without
    /// `sessionID`, `RpcError` if the request could not be sent
    pub async fn authenticate(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Session, BusError> {
        let url = format!("{}{}", base_url(endpoint), Self::SESSION_ENDPOINT);
        info!("POST {url} as {}", credentials.username);

        let res = self
            .client
            .post(&url)
            .json(credentials)
            .send()
            .await
            .map_err(|e| transport_error(e, &format!("POST {url}")))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| transport_error(e, &format!("POST {url}")))?;

        if !status.is_success() {
            return Err(BusError::Auth(format!(
                "session request failed with status {status} and body: {body}"
            )));
        }

        let token = parse_session_token(&body)?;
        debug!("session established");

        Ok(Session {
            token,
            obtained_at: SystemTime::now(),
        })
    }
}

fn parse_session_token(body: &str) -> Result<String, BusError> {
    let response: SessionResponse = serde_json::from_str(body)
        .map_err(|e| BusError::Auth(format!("failed to parse session response: {e}")))?;

    match response.session_id {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(BusError::Auth(
            "session response does not contain sessionID".to_string(),
        )),
    }
}
