//! `reqwest` implementation of the backend seams.
//!
//! | Call | Request | Response |
//! |------|---------|----------|
//! | upload media | `POST /media` (raw bytes, `x-media-kind`) | `{ "url": .. }` |
//! | send message | `POST /messages` (JSON metadata) | `{ "id": .. }` |
//! | queue push | `POST /push` | any |
//! | validate token | `POST /push/validate` `{ "token": .. }` | `{ "valid": bool }` |
//! | fetch snapshot | `GET /snapshots/{key}` | JSON payload |

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use eclair_shared::types::MediaRef;
use eclair_shared::TransportError;

use crate::backend::{BackendTransport, OutgoingMetadata, PushRequest, SnapshotSource};

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Deserialize)]
struct ValidateResponse {
    valid: bool,
}

pub struct HttpTransport {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| TransportError::permanent(format!("invalid backend URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::permanent("backend URL cannot be a base"));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| TransportError::permanent(format!("http client: {e}")))?;

        Ok(Self { base_url, http })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn check(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        Err(classify_status(status, &detail))
    }
}

/// Timeouts, throttling and server errors are worth retrying; any other
/// rejection is final.
pub fn classify_status(status: StatusCode, detail: &str) -> TransportError {
    let reason = if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    };

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        TransportError::Transient(reason)
    } else {
        TransportError::Permanent(reason)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        return TransportError::permanent(format!("malformed response: {err}"));
    }
    if let Some(status) = err.status() {
        return classify_status(status, "");
    }
    TransportError::transient(err.to_string())
}

fn local_path(media_ref: &str) -> &str {
    media_ref.strip_prefix("file://").unwrap_or(media_ref)
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn upload_media(&self, media: &MediaRef) -> Result<String, TransportError> {
        let path = local_path(&media.local_media_ref);
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                TransportError::permanent(format!("media file unreadable: {e}"))
            }
            _ => TransportError::transient(format!("media read failed: {e}")),
        })?;
        debug!(bytes = bytes.len(), kind = media.media_kind.as_str(), "uploading media");

        let response = self
            .http
            .post(self.endpoint(&["media"]))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("x-media-kind", media.media_kind.as_str())
            .body(bytes)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let uploaded: UploadResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;
        Ok(uploaded.url)
    }

    async fn send_message(&self, metadata: &OutgoingMetadata) -> Result<String, TransportError> {
        let response = self
            .http
            .post(self.endpoint(&["messages"]))
            .json(metadata)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let sent: SendResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;
        Ok(sent.id)
    }

    async fn queue_push(&self, request: &PushRequest) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.endpoint(&["push"]))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn validate_token(&self, token: &str) -> Result<bool, TransportError> {
        let response = self
            .http
            .post(self.endpoint(&["push", "validate"]))
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let validated: ValidateResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)?;
        Ok(validated.valid)
    }
}

#[async_trait]
impl SnapshotSource for HttpTransport {
    async fn fetch_snapshot(&self, key: &str) -> Result<Value, TransportError> {
        let response = self
            .http
            .get(self.endpoint(&["snapshots", key]))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest_error)
    }
}

#[cfg(test)]
mod tests {
    use eclair_shared::MediaKind;

    use super::*;

    #[test]
    fn status_classification() {
        for code in [408, 429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_status(status, "").is_transient(), "{code}");
        }
        for code in [400, 401, 403, 404, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!classify_status(status, "nope").is_transient(), "{code}");
        }
    }

    #[test]
    fn endpoints_are_joined_and_escaped() {
        let http = HttpTransport::new("https://api.eclair.app/v1/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            http.endpoint(&["push", "validate"]).as_str(),
            "https://api.eclair.app/v1/push/validate"
        );
        assert_eq!(
            http.endpoint(&["snapshots", "conversation/u2"]).as_str(),
            "https://api.eclair.app/v1/snapshots/conversation%2Fu2"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn missing_media_file_is_permanent() {
        let http = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let media = MediaRef {
            local_media_ref: "file:///definitely/not/here.jpg".into(),
            media_kind: MediaKind::Photo,
            size_bytes: 10,
        };
        let err = http.upload_media(&media).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
