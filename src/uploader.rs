use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Method, Url};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::UploadError;
use crate::media::{filename_from_url, generate_filename, normalize_mime, MAX_UPLOAD_BYTES};
use crate::model::{scalar_string, UploadResult};
use crate::request_client::RateLimitedClient;
use crate::transport::{FilePart, HttpRequest, RequestBody};

pub const UPLOAD_ENDPOINT: &str = "medias/upload";

#[derive(Clone, PartialEq, Eq)]
pub enum MediaSource {
    RemoteUrl(String),
    LocalBlob {
        bytes: Vec<u8>,
        mime: Option<String>,
        file_name: Option<String>,
    },
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::RemoteUrl(url) => f.debug_tuple("RemoteUrl").field(url).finish(),
            MediaSource::LocalBlob { bytes, mime, file_name } => f
                .debug_struct("LocalBlob")
                .field("len", &bytes.len())
                .field("mime", mime)
                .field("file_name", file_name)
                .finish(),
        }
    }
}

impl MediaSource {
    pub fn blob(bytes: Vec<u8>, mime: Option<&str>) -> Self {
        MediaSource::LocalBlob {
            bytes,
            mime: mime.map(str::to_string),
            file_name: None,
        }
    }
}

/// Binary returned by a privileged fetch, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedPayload {
    pub data_base64: String,
    pub content_type: Option<String>,
}

/// An execution context able to fetch URLs the direct path cannot reach.
#[async_trait]
pub trait PrivilegedFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PrivilegedPayload, String>;
}

pub struct MediaUploader {
    client: Arc<RateLimitedClient>,
    privileged: Option<Arc<dyn PrivilegedFetch>>,
    timeout: Duration,
}

impl fmt::Debug for MediaUploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaUploader")
            .field("client", &self.client)
            .field("privileged", &self.privileged.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

struct Fetched {
    bytes: Vec<u8>,
    content_type: Option<String>,
}

impl MediaUploader {
    pub fn new(client: Arc<RateLimitedClient>, timeout: Duration) -> Self {
        Self {
            client,
            privileged: None,
            timeout,
        }
    }

    pub fn with_privileged_fetch(mut self, fetcher: Arc<dyn PrivilegedFetch>) -> Self {
        self.privileged = Some(fetcher);
        self
    }

    #[instrument(skip_all)]
    pub async fn upload(&self, source: MediaSource) -> Result<UploadResult, UploadError> {
        let (bytes, declared, file_name, url) = match source {
            MediaSource::LocalBlob { bytes, mime, file_name } => (bytes, mime, file_name, None),
            MediaSource::RemoteUrl(url) => {
                let fetched = self.fetch_remote(&url).await?;
                (fetched.bytes, fetched.content_type, None, Some(url))
            }
        };

        if bytes.is_empty() {
            return Err(UploadError::EmptyFile);
        }
        let size = bytes.len() as u64;
        if size > MAX_UPLOAD_BYTES {
            return Err(UploadError::TooLarge {
                size,
                limit: MAX_UPLOAD_BYTES,
            });
        }

        let mime = normalize_mime(declared.as_deref(), &bytes);
        let file_name = file_name
            .or_else(|| url.as_deref().and_then(filename_from_url))
            .unwrap_or_else(|| generate_filename(&mime));
        info!(size, mime = %mime, file_name = %file_name, "uploading media");

        let body = RequestBody::Multipart(FilePart {
            field: "file".to_string(),
            file_name,
            mime,
            bytes,
        });
        let response = self
            .client
            .send_with_timeout(Method::POST, UPLOAD_ENDPOINT, body, Some(self.timeout))
            .await?;

        let storage_object_id = response
            .get("storage_object_id")
            .and_then(scalar_string)
            .ok_or_else(|| {
                UploadError::MalformedResponse(format!("missing storage_object_id in {}", response))
            })?;
        debug!(storage_object_id = %storage_object_id, "upload complete");
        Ok(UploadResult { storage_object_id })
    }

    /// Direct GET first, then the privileged context when one is configured.
    async fn fetch_remote(&self, url: &str) -> Result<Fetched, UploadError> {
        let parsed = Url::parse(url)
            .map_err(|e| UploadError::Network(format!("invalid media URL {}: {}", url, e)))?;
        let host = parsed.host_str().unwrap_or("unknown host").to_string();

        let mut request = HttpRequest::get(parsed);
        request.timeout = Some(self.timeout);
        let direct_failure = match self.client.transport().execute(request).await {
            Ok(res) if res.is_success() => {
                return Ok(Fetched {
                    bytes: res.body,
                    content_type: res.content_type,
                })
            }
            Ok(res) => format!("HTTP {}", res.status),
            Err(err) => err.to_string(),
        };
        warn!(host = %host, reason = %direct_failure, "direct media fetch failed");

        let Some(privileged) = &self.privileged else {
            return Err(UploadError::Network(format!(
                "unable to fetch media from {} ({})",
                host, direct_failure
            )));
        };

        match privileged.fetch(url).await.and_then(|p| decode_payload(&p)) {
            Ok(fetched) => {
                debug!(host = %host, len = fetched.bytes.len(), "privileged fetch succeeded");
                Ok(fetched)
            }
            Err(reason) => Err(UploadError::Network(format!(
                "unable to fetch media from {} ({}; privileged fetch: {})",
                host, direct_failure, reason
            ))),
        }
    }
}

fn decode_payload(payload: &PrivilegedPayload) -> Result<Fetched, String> {
    let data = payload.data_base64.trim();
    // Accept data URLs as well as bare base64.
    let data = match data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| format!("invalid base64 payload: {}", e))?;
    Ok(Fetched {
        bytes,
        content_type: payload.content_type.clone(),
    })
}
