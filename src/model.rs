use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::num::NonZeroU32;

use crate::config::ConfigError;

/// Lead time before a publish-now batch starts.
pub const PUBLISH_NOW_LEAD_SECONDS: i64 = 30;

/// One captured asset queued for scheduling. Field names follow the
/// persisted store layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureItem {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub is_text_only: bool,
    #[serde(default)]
    pub category: String,
    /// Capture time in unix milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<String>,
    /// Per-post title; the caption stands in when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Fields this crate does not interpret, kept for rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CaptureItem {
    pub fn text_only(caption: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            is_text_only: true,
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn with_image(
        image_url: impl Into<String>,
        caption: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            image_url: Some(image_url.into()),
            caption: caption.into(),
            category: category.into(),
            ..Default::default()
        }
    }

    /// Usable pre-uploaded storage reference, if any.
    pub fn storage_ref(&self) -> Option<&str> {
        self.storage_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn post_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.caption)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResult {
    pub storage_object_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeSettings {
    pub video_title: String,
    pub video_description: String,
    pub video_privacy_status: String,
    pub video_type: String,
}

impl YoutubeSettings {
    pub fn public_video(title: &str, description: &str) -> Self {
        Self {
            video_title: title.to_string(),
            video_description: description.to_string(),
            video_privacy_status: "public".to_string(),
            video_type: "video".to_string(),
        }
    }
}

/// Body of the create-scheduled-post call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchedulePayload {
    pub text: String,
    pub channel_ids: Vec<String>,
    #[serde(serialize_with = "serialize_instant")]
    pub schedule_at: DateTime<Utc>,
    pub image_object_ids: Vec<String>,
    pub is_draft: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_settings: Option<YoutubeSettings>,
}

/// RFC 3339 UTC with millisecond precision, e.g. `2024-01-01T00:10:00.000Z`.
pub fn format_instant(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_instant<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_instant(at))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPostHandle {
    pub post_id: String,
    pub scheduled_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub name: Option<String>,
    pub platform: Option<String>,
}

impl Channel {
    /// Parse a channel entry, accepting numeric or string ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = scalar_string(value.get("id")?)?;
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            id,
            name: text("name"),
            platform: text("platform").or_else(|| text("type")),
        })
    }
}

/// String form of a JSON string or number.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct BulkScheduleRequest {
    pub items: Vec<CaptureItem>,
    pub channel_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub interval_minutes: NonZeroU32,
}

impl BulkScheduleRequest {
    /// Batch that starts shortly after `now` with one-minute spacing.
    pub fn publish_now(
        items: Vec<CaptureItem>,
        channel_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            items,
            channel_ids,
            start_time: now + Duration::seconds(PUBLISH_NOW_LEAD_SECONDS),
            // One minute apart.
            interval_minutes: NonZeroU32::MIN,
        }
    }

    /// Schedule time of item `index`: `start_time + index * interval_minutes`,
    /// or `None` when that falls outside the representable range.
    pub fn schedule_time(&self, index: usize) -> Option<DateTime<Utc>> {
        let index = i64::try_from(index).ok()?;
        let minutes = index.checked_mul(i64::from(self.interval_minutes.get()))?;
        self.start_time.checked_add_signed(Duration::try_minutes(minutes)?)
    }

    /// Every item's schedule time, checked up front.
    pub fn schedule_times(&self) -> Result<Vec<DateTime<Utc>>, ConfigError> {
        (0..self.items.len())
            .map(|i| {
                self.schedule_time(i)
                    .ok_or(ConfigError::Invalid("interval puts schedule times out of range"))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Uploading,
    Scheduling,
    Succeeded,
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Uploading => "uploading",
            ItemState::Scheduling => "scheduling",
            ItemState::Succeeded => "succeeded",
            ItemState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BulkItemResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScheduledPostHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub item: CaptureItem,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn payload_without_title_omits_video_settings() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let payload = SchedulePayload {
            text: "Hello".into(),
            channel_ids: vec!["c1".into()],
            schedule_at: at,
            image_object_ids: vec!["m1".into()],
            is_draft: false,
            youtube_settings: None,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            v,
            json!({
                "text": "Hello",
                "channel_ids": ["c1"],
                "schedule_at": "2024-01-01T00:10:00.000Z",
                "image_object_ids": ["m1"],
                "is_draft": false
            })
        );
        assert!(v.get("youtube_settings").is_none());
    }

    #[test]
    fn video_settings_use_camel_case() {
        let v = serde_json::to_value(YoutubeSettings::public_video("T", "D")).unwrap();
        assert_eq!(v["videoTitle"], "T");
        assert_eq!(v["videoPrivacyStatus"], "public");
        assert_eq!(v["videoType"], "video");
    }

    #[test]
    fn capture_item_keeps_unknown_fields() {
        let raw = json!({
            "imageUrl": "https://x/y.jpg",
            "caption": "hi",
            "isTextOnly": false,
            "category": "cats",
            "timestamp": 1700000000000i64,
            "source": "instagram"
        });
        let item: CaptureItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.image_ref(), Some("https://x/y.jpg"));
        assert_eq!(item.extra["source"], "instagram");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn blank_storage_id_is_ignored() {
        let mut item = CaptureItem::text_only("t", "c");
        item.storage_id = Some("  ".into());
        assert_eq!(item.storage_ref(), None);
        item.storage_id = Some("s1".into());
        assert_eq!(item.storage_ref(), Some("s1"));
    }

    #[test]
    fn schedule_times_step_by_interval() {
        let req = BulkScheduleRequest {
            items: vec![],
            channel_ids: vec!["c".into()],
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            interval_minutes: NonZeroU32::new(10).unwrap(),
        };
        assert_eq!(
            format_instant(&req.schedule_time(2).unwrap()),
            "2024-01-01T00:20:00.000Z"
        );
    }

    #[test]
    fn oversized_interval_is_rejected_before_scheduling() {
        let req = BulkScheduleRequest {
            items: vec![CaptureItem::text_only("t", "c"); 200],
            channel_ids: vec!["c".into()],
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            interval_minutes: NonZeroU32::new(u32::MAX).unwrap(),
        };
        assert!(req.schedule_time(0).is_some());
        assert!(req.schedule_time(199).is_none());
        assert!(matches!(req.schedule_times(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn publish_now_starts_after_lead_time() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let req = BulkScheduleRequest::publish_now(
            vec![CaptureItem::text_only("a", "c"), CaptureItem::text_only("b", "c")],
            vec!["c1".into()],
            now,
        );
        let times: Vec<String> = req
            .schedule_times()
            .unwrap()
            .iter()
            .map(format_instant)
            .collect();
        assert_eq!(times, vec!["2024-01-01T12:00:30.000Z", "2024-01-01T12:01:30.000Z"]);
    }

    #[test]
    fn title_falls_back_to_caption() {
        let mut item = CaptureItem::text_only("the caption", "c");
        assert_eq!(item.post_title(), "the caption");
        item.title = Some(" ".into());
        assert_eq!(item.post_title(), "the caption");
        item.title = Some("Own title".into());
        assert_eq!(item.post_title(), "Own title");
    }

    #[test]
    fn channel_accepts_numeric_id() {
        let c =
            Channel::from_value(&json!({"id": 42, "name": "Page", "type": "facebook"})).unwrap();
        assert_eq!(c.id, "42");
        assert_eq!(c.platform.as_deref(), Some("facebook"));
        assert!(Channel::from_value(&json!({"name": "x"})).is_none());
    }
}
