use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use uuid::Uuid;

use crate::error::ApiError;

/// Client for the external media object store. Uploads are synchronous with
/// the request: a failure here surfaces as `UploadFailed` before any chat,
/// request, or post row is written.
#[derive(Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl MediaClient {
    pub fn from_env() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: std::env::var("TRENDOTALK_MEDIA_URL").ok(),
        }
    }

    pub fn new(base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ApiError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| ApiError::UploadFailed("media store not configured".into()))?;

        let key = format!("{}-{}", Uuid::new_v4(), sanitize(file_name));
        let url = format!("{}/{}", base.trim_end_matches('/'), key);

        let resp = self
            .http
            .put(&url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ApiError::UploadFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ApiError::UploadFailed(format!(
                "media store returned {}",
                resp.status()
            )));
        }

        Ok(url)
    }
}

/// Decode and upload an optional base64 payload. `None` in, `None` out.
pub async fn maybe_upload(
    media: &MediaClient,
    file_data: Option<String>,
    file_name: Option<String>,
) -> Result<Option<String>, ApiError> {
    let Some(data) = file_data else {
        return Ok(None);
    };
    let bytes = B64
        .decode(&data)
        .map_err(|_| ApiError::BadRequest("file_data must be base64"))?;
    let name = file_name.unwrap_or_else(|| "file".into());
    Ok(Some(media.upload(&name, bytes).await?))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize("my video.mp4"), "my_video.mp4");
        assert_eq!(sanitize("../../etc/passwd"), ".._.._etc_passwd");
    }

    #[tokio::test]
    async fn unconfigured_store_rejects_uploads() {
        let media = MediaClient::new(None);
        let err = media.upload("a.png", vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, ApiError::UploadFailed(_)));
    }
}
