//! Request plumbing shared by every source: client construction, API key
//! headers, cancellation and failure classification

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serac_core::{FetchErrorKind, SourceError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Header carrying Météo-France API keys
pub const API_KEY_HEADER: &str = "apikey";

const PREVIEW_LEN: usize = 200;

pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("serac/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Default headers for an authenticated upstream.
///
/// The value is marked sensitive so it is masked in debug output.
pub fn api_key_headers(token: &SecretString) -> Result<HeaderMap, String> {
    let mut value = HeaderValue::from_str(token.expose_secret())
        .map_err(|e| format!("invalid API key header value: {e}"))?;
    value.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(API_KEY_HEADER, value);
    Ok(headers)
}

/// Failure kind for a response status, `None` on success
pub fn classify_status(status: StatusCode) -> Option<FetchErrorKind> {
    if status.is_success() {
        return None;
    }
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchErrorKind::Authorization,
        StatusCode::NOT_FOUND => FetchErrorKind::NotFoundOrOutOfSeason,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            FetchErrorKind::TransientNetwork
        }
        s if s.is_server_error() => FetchErrorKind::TransientNetwork,
        _ => FetchErrorKind::MalformedData,
    };
    Some(kind)
}

/// Failure kind for an error raised before a status was available
pub fn classify_transport(what: &str, err: &reqwest::Error) -> SourceError {
    if err.is_decode() {
        SourceError::malformed(format!("{what}: undecodable response: {err}"))
    } else if err.is_timeout() {
        SourceError::transient(format!("{what}: timed out"))
    } else {
        SourceError::transient(format!("{what}: {err}"))
    }
}

/// Run `request`, giving up as soon as `cancel` fires
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    request: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SourceError::transient("request cancelled")),
        result = request => result,
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(PREVIEW_LEN) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

async fn send(request: RequestBuilder, what: &str) -> Result<Response, SourceError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(what, &e))?;

    let status = response.status();
    debug!(status = status.as_u16(), "{} answered", what);
    let Some(kind) = classify_status(status) else {
        return Ok(response);
    };

    // Rejected credentials get no body in the message
    let message = if kind == FetchErrorKind::Authorization {
        format!("{what} returned {status}")
    } else {
        let body = response.text().await.unwrap_or_default();
        format!("{what} returned {status}: {}", preview(body.trim()))
    };
    Err(SourceError::new(kind, message))
}

/// GET returning the raw body
pub async fn get_text(request: RequestBuilder, what: &str) -> Result<String, SourceError> {
    send(request, what)
        .await?
        .text()
        .await
        .map_err(|e| classify_transport(what, &e))
}

/// GET returning a JSON body
pub async fn get_json(request: RequestBuilder, what: &str) -> Result<Value, SourceError> {
    let body = get_text(request, what).await?;
    serde_json::from_str(&body).map_err(|e| {
        SourceError::malformed(format!(
            "{what}: {e} (body preview: {:?})",
            preview(&body)
        ))
    })
}
