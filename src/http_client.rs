use crate::error::BusError;
use crate::path::BusPath;
use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

/// Create the HTTP client used for bus and session requests
///
/// # Arguments
/// * `request_timeout` - Upper bound for a single request including the response body
///
/// # Examples
/// ```no_run
/// use meshprov::http_client::http_client;
/// use std::time::Duration;
///
/// let client = http_client(Duration::from_secs(10)).expect("failed to create client");
/// ```
pub fn http_client(request_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .context("failed to create HTTP client")
}

/// Normalize a base url so endpoint paths can be appended with a single "/"
pub fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Map a transport-level reqwest failure to a bus error
pub fn transport_error(err: reqwest::Error, context_msg: &str) -> BusError {
    if err.is_timeout() {
        BusError::Rpc(format!("{context_msg} timed out: {err}"))
    } else {
        BusError::Rpc(format!("{context_msg} failed: {err}"))
    }
}

/// Handle HTTP response by checking status and extracting body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `path` - Data-model path the request addressed, reported on 404
/// * `context_msg` - Context message describing the request (e.g., "GET Device.WiFi.")
///
/// # Returns
/// * `Ok(String)` - The response body if the status is successful
/// * `Err` - The status mapped to the matching `BusError` variant
pub async fn handle_http_response(
    res: Response,
    path: &BusPath,
    context_msg: &str,
) -> Result<String, BusError> {
    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| transport_error(e, context_msg))?;

    match status_error(status, path, context_msg, &body) {
        Some(err) => Err(err),
        None => Ok(body),
    }
}

fn status_error(
    status: StatusCode,
    path: &BusPath,
    context_msg: &str,
    body: &str,
) -> Option<BusError> {
    if status.is_success() {
        return None;
    }

    let detail = format!("{context_msg} failed with status {status} and body: {body}");

    Some(match status {
        StatusCode::NOT_FOUND => BusError::NotFound(path.clone()),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            BusError::InvalidParameter(detail)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BusError::Auth(detail),
        _ => BusError::Rpc(detail),
    })
}
