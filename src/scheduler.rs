use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use crate::config::{ConfigError, Posting};
use crate::error::ScheduleError;
use crate::model::{SchedulePayload, ScheduledPostHandle, UploadResult, YoutubeSettings};
use crate::posting::PostingApi;
use crate::transport::HttpTransport;
use crate::uploader::{MediaSource, MediaUploader, PrivilegedFetch};

pub const TEST_DRAFT_TEXT: &str = "Test post from capture-scheduler - API check (DRAFT MODE)";

/// Media attached to a single post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    /// Already uploaded; no upload is performed.
    StorageId(String),
    Source(MediaSource),
    /// Text-only post.
    None,
}

#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub media: MediaRef,
    pub caption: String,
    pub channel_ids: Vec<String>,
    pub schedule_at: DateTime<Utc>,
    pub title: Option<String>,
    pub is_draft: bool,
}

#[derive(Debug, Clone)]
pub struct AlbumRequest {
    pub sources: Vec<MediaSource>,
    pub caption: String,
    pub channel_ids: Vec<String>,
    pub schedule_at: DateTime<Utc>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlbumHandle {
    #[serde(flatten)]
    pub post: ScheduledPostHandle,
    pub image_count: usize,
}

/// Build the create-post body for already-resolved media ids.
pub fn build_payload(request: &ScheduleRequest, media_ids: Vec<String>) -> SchedulePayload {
    payload_for(
        &request.caption,
        &request.channel_ids,
        request.schedule_at,
        media_ids,
        request.is_draft,
        request.title.as_deref(),
    )
}

fn payload_for(
    caption: &str,
    channel_ids: &[String],
    schedule_at: DateTime<Utc>,
    media_ids: Vec<String>,
    is_draft: bool,
    title: Option<&str>,
) -> SchedulePayload {
    let youtube_settings = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| YoutubeSettings::public_video(t, caption));
    SchedulePayload {
        text: caption.to_string(),
        channel_ids: channel_ids.to_vec(),
        schedule_at,
        image_object_ids: media_ids,
        is_draft,
        youtube_settings,
    }
}

/// What the bulk orchestrator needs from the posting side.
#[async_trait]
pub trait PostPublisher: Send + Sync {
    fn is_authenticated(&self) -> bool;
    async fn upload_media(&self, source: MediaSource) -> Result<UploadResult, ScheduleError>;
    async fn schedule_post(
        &self,
        request: ScheduleRequest,
    ) -> Result<ScheduledPostHandle, ScheduleError>;
}

#[derive(Debug)]
pub struct PostScheduler {
    api: PostingApi,
    uploader: MediaUploader,
    album_upload_delay: Duration,
}

impl PostScheduler {
    pub fn new(api: PostingApi, uploader: MediaUploader, album_upload_delay: Duration) -> Self {
        Self {
            api,
            uploader,
            album_upload_delay,
        }
    }

    /// Posting API and uploader sharing one paced client.
    pub fn from_config(
        cfg: &Posting,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        let client = Arc::new(PostingApi::client_from_config(cfg, transport)?);
        Ok(Self::new(
            PostingApi::new(Arc::clone(&client)),
            MediaUploader::new(client, cfg.upload_timeout()),
            cfg.album_upload_delay(),
        ))
    }

    pub fn with_privileged_fetch(mut self, fetcher: Arc<dyn PrivilegedFetch>) -> Self {
        self.uploader = self.uploader.with_privileged_fetch(fetcher);
        self
    }

    pub fn api(&self) -> &PostingApi {
        &self.api
    }

    fn preflight(&self, channel_ids: &[String]) -> Result<(), ScheduleError> {
        if !self.api.is_authenticated() {
            return Err(ScheduleError::NotAuthenticated);
        }
        if channel_ids.is_empty() {
            return Err(ScheduleError::EmptyChannels);
        }
        Ok(())
    }

    pub async fn upload(&self, source: MediaSource) -> Result<UploadResult, ScheduleError> {
        Ok(self.uploader.upload(source).await?)
    }

    async fn resolve_media(&self, media: MediaRef) -> Result<Vec<String>, ScheduleError> {
        match media {
            MediaRef::StorageId(id) => {
                debug!(storage_id = %id, "using existing storage id");
                Ok(vec![id])
            }
            MediaRef::Source(source) => {
                let uploaded = self.uploader.upload(source).await?;
                Ok(vec![uploaded.storage_object_id])
            }
            MediaRef::None => Ok(Vec::new()),
        }
    }

    #[instrument(skip_all, fields(channels = request.channel_ids.len()))]
    pub async fn schedule(
        &self,
        mut request: ScheduleRequest,
    ) -> Result<ScheduledPostHandle, ScheduleError> {
        self.preflight(&request.channel_ids)?;
        let media = std::mem::replace(&mut request.media, MediaRef::None);
        let ids = self.resolve_media(media).await?;
        let payload = build_payload(&request, ids);
        self.api.create_scheduled_post(&payload).await
    }

    /// Upload every source in order, then post them as one album. Any upload
    /// failure fails the whole album.
    #[instrument(skip_all, fields(sources = request.sources.len()))]
    pub async fn schedule_album(
        &self,
        request: AlbumRequest,
    ) -> Result<AlbumHandle, ScheduleError> {
        self.preflight(&request.channel_ids)?;
        let total = request.sources.len();
        let mut ids = Vec::with_capacity(total);
        for (i, source) in request.sources.into_iter().enumerate() {
            if i > 0 {
                sleep(self.album_upload_delay).await;
            }
            let uploaded = self.uploader.upload(source).await?;
            info!(uploaded = i + 1, total, "album image uploaded");
            ids.push(uploaded.storage_object_id);
        }
        let image_count = ids.len();
        let payload = payload_for(
            &request.caption,
            &request.channel_ids,
            request.schedule_at,
            ids,
            false,
            request.title.as_deref(),
        );
        let post = self.api.create_scheduled_post(&payload).await?;
        Ok(AlbumHandle { post, image_count })
    }

    /// Create a draft post five minutes ahead; drafts never publish.
    pub async fn schedule_test_draft(
        &self,
        channel_id: &str,
        storage_id: &str,
    ) -> Result<ScheduledPostHandle, ScheduleError> {
        let request = ScheduleRequest {
            media: MediaRef::StorageId(storage_id.to_string()),
            caption: TEST_DRAFT_TEXT.to_string(),
            channel_ids: vec![channel_id.to_string()],
            schedule_at: Utc::now() + ChronoDuration::minutes(5),
            title: None,
            is_draft: true,
        };
        self.schedule(request).await
    }
}

#[async_trait]
impl PostPublisher for PostScheduler {
    fn is_authenticated(&self) -> bool {
        self.api.is_authenticated()
    }

    async fn upload_media(&self, source: MediaSource) -> Result<UploadResult, ScheduleError> {
        self.upload(source).await
    }

    async fn schedule_post(
        &self,
        request: ScheduleRequest,
    ) -> Result<ScheduledPostHandle, ScheduleError> {
        self.schedule(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use crate::request_client::{
        ClientSettings, CredentialPlacement, CredentialRing, RateLimitedClient,
    };
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::{HttpResponse, RequestBody};
    use chrono::TimeZone;
    use reqwest::Url;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn scheduler(transport: &ScriptedTransport) -> PostScheduler {
        let client = Arc::new(RateLimitedClient::new(
            Arc::new(transport.clone()),
            Url::parse("https://api.example.com/v1/").unwrap(),
            CredentialRing::new(["key"]),
            CredentialPlacement::Query("apikey"),
            ClientSettings {
                min_interval: Duration::ZERO,
                ..ClientSettings::default()
            },
        ));
        PostScheduler::new(
            PostingApi::new(client.clone()),
            MediaUploader::new(client, Duration::from_secs(60)),
            Duration::from_millis(500),
        )
    }

    fn request(media: MediaRef, title: Option<&str>) -> ScheduleRequest {
        ScheduleRequest {
            media,
            caption: "Hello".into(),
            channel_ids: vec!["c1".into()],
            schedule_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            title: title.map(str::to_string),
            is_draft: false,
        }
    }

    fn posted_body(transport: &ScriptedTransport) -> Value {
        match &transport.requests_to("scheduled_posts")[0].body {
            RequestBody::Json(v) => v.clone(),
            other => panic!("unexpected body {:?}", other),
        }
    }

    fn ok_post(transport: &ScriptedTransport) {
        transport.on_json(
            "scheduled_posts",
            200,
            json!({"scheduled_posts": [{"id": "p1", "schedule_at": "2024-01-01T00:00:00Z"}]}),
        );
    }

    #[test]
    fn title_adds_video_settings() {
        let payload = build_payload(&request(MediaRef::None, Some("My title")), vec!["m1".into()]);
        let settings = payload.youtube_settings.unwrap();
        assert_eq!(settings.video_title, "My title");
        assert_eq!(settings.video_description, "Hello");

        let payload = build_payload(&request(MediaRef::None, Some("  ")), vec![]);
        assert!(payload.youtube_settings.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn storage_id_skips_upload() {
        let transport = ScriptedTransport::new();
        ok_post(&transport);
        let s = scheduler(&transport);
        let handle = s
            .schedule(request(MediaRef::StorageId("m1".into()), None))
            .await
            .unwrap();
        assert_eq!(handle.post_id, "p1");
        assert!(transport.requests_to("medias/upload").is_empty());

        let body = posted_body(&transport);
        assert_eq!(body["image_object_ids"], json!(["m1"]));
        assert_eq!(body["is_draft"], false);
        assert!(body.get("youtube_settings").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn text_only_sends_no_media() {
        let transport = ScriptedTransport::new();
        ok_post(&transport);
        scheduler(&transport).schedule(request(MediaRef::None, None)).await.unwrap();
        assert_eq!(posted_body(&transport)["image_object_ids"], json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn source_is_uploaded_before_scheduling() {
        let transport = ScriptedTransport::new();
        transport.on_json("medias/upload", 200, json!({"storage_object_id": "up-1"}));
        ok_post(&transport);
        let s = scheduler(&transport);
        s.schedule(request(
            MediaRef::Source(MediaSource::blob(vec![0xFF, 0xD8, 0xFF, 0xE0], None)),
            None,
        ))
        .await
        .unwrap();
        assert_eq!(posted_body(&transport)["image_object_ids"], json!(["up-1"]));
    }

    #[tokio::test]
    async fn empty_channel_list_is_rejected_locally() {
        let transport = ScriptedTransport::new();
        let mut req = request(MediaRef::StorageId("m1".into()), None);
        req.channel_ids.clear();
        let err = scheduler(&transport).schedule(req).await.unwrap_err();
        assert_eq!(err, ScheduleError::EmptyChannels);
        assert_eq!(err.category(), None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn album_uploads_sequentially_with_pacing() {
        let transport = ScriptedTransport::new();
        transport
            .on_json("medias/upload", 200, json!({"storage_object_id": "a"}))
            .on_json("medias/upload", 200, json!({"storage_object_id": "b"}))
            .on_json("medias/upload", 200, json!({"storage_object_id": "c"}));
        ok_post(&transport);
        let s = scheduler(&transport);
        let started = Instant::now();
        let handle = s
            .schedule_album(AlbumRequest {
                sources: (0..3).map(|_| MediaSource::blob(vec![1, 2, 3, 4], None)).collect(),
                caption: "trip".into(),
                channel_ids: vec!["c1".into()],
                schedule_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                title: None,
            })
            .await
            .unwrap();
        assert_eq!(handle.image_count, 3);
        assert_eq!(posted_body(&transport)["image_object_ids"], json!(["a", "b", "c"]));
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn album_fails_whole_on_single_upload_failure() {
        let transport = ScriptedTransport::new();
        transport
            .on_json("medias/upload", 200, json!({"storage_object_id": "a"}))
            .on(
                "medias/upload",
                Ok(HttpResponse { status: 500, content_type: None, body: b"boom".to_vec() }),
            );
        let s = scheduler(&transport);
        let err = s
            .schedule_album(AlbumRequest {
                sources: (0..3).map(|_| MediaSource::blob(vec![1, 2, 3, 4], None)).collect(),
                caption: "trip".into(),
                channel_ids: vec!["c1".into()],
                schedule_at: Utc::now(),
                title: None,
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ScheduleError::Upload(UploadError::Upstream { status: 500, message: "boom".into() })
        );
        assert_eq!(transport.requests_to("medias/upload").len(), 2);
        assert!(transport.requests_to("scheduled_posts").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_draft_is_flagged_and_in_the_future() {
        let transport = ScriptedTransport::new();
        ok_post(&transport);
        let before = Utc::now();
        scheduler(&transport).schedule_test_draft("c9", "m9").await.unwrap();
        let body = posted_body(&transport);
        assert_eq!(body["is_draft"], true);
        assert_eq!(body["channel_ids"], json!(["c9"]));
        let at: DateTime<Utc> = body["schedule_at"].as_str().unwrap().parse().unwrap();
        assert!(at > before + ChronoDuration::minutes(4));
    }
}
