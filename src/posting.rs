//! Posting service endpoints.

use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{ConfigError, Posting};
use crate::error::ScheduleError;
use crate::model::{format_instant, scalar_string, Channel, SchedulePayload, ScheduledPostHandle};
use crate::request_client::{ClientSettings, CredentialPlacement, CredentialRing, RateLimitedClient};
use crate::transport::{HttpTransport, RequestBody};

pub const CHANNELS_ENDPOINT: &str = "channels";
pub const SCHEDULED_POSTS_ENDPOINT: &str = "scheduled_posts/";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionReport {
    pub channels: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PostingApi {
    client: Arc<RateLimitedClient>,
}

impl PostingApi {
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }

    /// Build the posting client: a single query-string credential, paced by
    /// `min_interval_ms`.
    pub fn client_from_config(
        cfg: &Posting,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<RateLimitedClient, ConfigError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|_| ConfigError::Invalid("posting.base_url must be an absolute URL"))?;
        let settings = ClientSettings {
            min_interval: cfg.min_interval(),
            max_attempts: 1,
            timeout: Some(cfg.request_timeout()),
            ..ClientSettings::default()
        };
        Ok(RateLimitedClient::new(
            transport,
            base_url,
            CredentialRing::new([cfg.api_key.as_str()]),
            CredentialPlacement::Query("apikey"),
            settings,
        ))
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.has_credentials()
    }

    #[instrument(skip_all)]
    pub async fn list_channels(&self) -> Result<Vec<Channel>, ScheduleError> {
        let body = self
            .client
            .send(Method::GET, CHANNELS_ENDPOINT, RequestBody::Empty)
            .await?;
        let entries = match body {
            Value::Array(entries) => entries,
            Value::Null => Vec::new(),
            other => {
                return Err(ScheduleError::MalformedResponse(format!(
                    "expected a channel list, got {}",
                    other
                )))
            }
        };
        let channels: Vec<Channel> = entries
            .iter()
            .filter_map(|entry| {
                let channel = Channel::from_value(entry);
                if channel.is_none() {
                    warn!(entry = %entry, "skipping channel without id");
                }
                channel
            })
            .collect();
        Ok(channels)
    }

    pub async fn test_connection(&self) -> Result<ConnectionReport, ScheduleError> {
        let channels = self.list_channels().await?.len();
        Ok(ConnectionReport {
            channels,
            message: format!("Connected successfully! Found {} channels.", channels),
        })
    }

    /// Submit a payload. The response must carry a non-empty
    /// `scheduled_posts` array.
    #[instrument(skip_all, fields(schedule_at = %format_instant(&payload.schedule_at)))]
    pub async fn create_scheduled_post(
        &self,
        payload: &SchedulePayload,
    ) -> Result<ScheduledPostHandle, ScheduleError> {
        let body = serde_json::to_value(payload)
            .map_err(|e| {
                ScheduleError::MalformedResponse(format!("payload encoding failed: {}", e))
            })?;
        let response = self
            .client
            .send(Method::POST, SCHEDULED_POSTS_ENDPOINT, RequestBody::Json(body))
            .await?;
        let handle = parse_scheduled_posts(&response)?;
        info!(post_id = %handle.post_id, "post scheduled");
        Ok(handle)
    }
}

fn parse_scheduled_posts(response: &Value) -> Result<ScheduledPostHandle, ScheduleError> {
    let first = response
        .get("scheduled_posts")
        .and_then(Value::as_array)
        .and_then(|posts| posts.first())
        .ok_or_else(|| {
            ScheduleError::MalformedResponse("no scheduled_posts field found".to_string())
        })?;
    let post_id = first
        .get("id")
        .and_then(scalar_string)
        .ok_or_else(|| ScheduleError::MalformedResponse("scheduled post has no id".to_string()))?;
    let scheduled_at = first
        .get("schedule_at")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(ScheduledPostHandle {
        post_id,
        scheduled_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{example, Config};
    use crate::transport::mock::ScriptedTransport;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn api(transport: &ScriptedTransport) -> PostingApi {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        let client =
            PostingApi::client_from_config(&cfg.posting, Arc::new(transport.clone())).unwrap();
        PostingApi::new(Arc::new(client))
    }

    fn payload() -> SchedulePayload {
        SchedulePayload {
            text: "Hello".into(),
            channel_ids: vec!["c1".into()],
            schedule_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            image_object_ids: vec!["m1".into()],
            is_draft: false,
            youtube_settings: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lists_channels_with_api_key_in_query() {
        let transport = ScriptedTransport::new();
        transport.on_json(
            "channels",
            200,
            json!([
                {"id": "a", "name": "Page"},
                {"id": 7, "platform": "youtube"},
                {"name": "broken"}
            ]),
        );
        let channels = api(&transport).list_channels().await.unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[1].id, "7");
        let req = &transport.requests()[0];
        assert_eq!(req.url.path(), "/v1/channels");
        assert_eq!(req.query("apikey").as_deref(), Some("YOUR_POSTING_API_KEY"));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_report_counts_channels() {
        let transport = ScriptedTransport::new();
        transport.on_json("channels", 200, json!([{"id": "a"}, {"id": "b"}]));
        let report = api(&transport).test_connection().await.unwrap();
        assert_eq!(report.channels, 2);
        assert!(report.message.contains("Found 2 channels"));
    }

    #[tokio::test(start_paused = true)]
    async fn create_returns_first_scheduled_post() {
        let transport = ScriptedTransport::new();
        transport.on_json(
            "scheduled_posts",
            200,
            json!({"scheduled_posts": [{"id": 12, "schedule_at": "2024-01-01T00:00:00Z"}]}),
        );
        let handle = api(&transport).create_scheduled_post(&payload()).await.unwrap();
        assert_eq!(handle.post_id, "12");
        assert_eq!(handle.scheduled_at, "2024-01-01T00:00:00Z");

        let req = &transport.requests()[0];
        assert_eq!(req.url.path(), "/v1/scheduled_posts/");
        match &req.body {
            RequestBody::Json(v) => assert_eq!(v["schedule_at"], "2024-01-01T00:00:00.000Z"),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn response_without_scheduled_posts_is_malformed() {
        let transport = ScriptedTransport::new();
        transport.on_json("scheduled_posts", 200, json!({"status": "ok"}));
        let err = api(&transport).create_scheduled_post(&payload()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::MalformedResponse(_)));

        transport.on_json("scheduled_posts", 200, json!({"scheduled_posts": []}));
        let err = api(&transport).create_scheduled_post(&payload()).await.unwrap_err();
        assert!(matches!(err, ScheduleError::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_categorised() {
        let transport = ScriptedTransport::new();
        transport.on_json("scheduled_posts", 401, json!({"detail": "Invalid API key"}));
        let err = api(&transport).create_scheduled_post(&payload()).await.unwrap_err();
        assert_eq!(err, ScheduleError::AuthFailed("Invalid API key".into()));
        assert!(err.to_string().starts_with("Authentication failed"));
    }
}
