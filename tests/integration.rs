use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;

use capture_scheduler::config::ConfigError;
use capture_scheduler::error::{ScheduleError, UploadError};
use capture_scheduler::model::{
    format_instant, BulkScheduleRequest, CaptureItem, ScheduledPostHandle, UploadResult,
};
use capture_scheduler::orchestrator::BulkScheduler;
use capture_scheduler::scheduler::{MediaRef, PostPublisher, ScheduleRequest};
use capture_scheduler::uploader::MediaSource;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct ScheduleCall {
    media: MediaRef,
    caption: String,
    title: Option<String>,
    channel_ids: Vec<String>,
    schedule_at: String,
}

#[derive(Clone, Default)]
struct RecordingPublisher {
    unauthenticated: bool,
    upload_responses: Arc<Mutex<VecDeque<Result<UploadResult, ScheduleError>>>>,
    uploads: Arc<Mutex<Vec<MediaSource>>>,
    schedules: Arc<Mutex<Vec<ScheduleCall>>>,
}

impl RecordingPublisher {
    fn with_upload_responses(responses: Vec<Result<UploadResult, ScheduleError>>) -> Self {
        Self {
            upload_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn uploads(&self) -> Vec<MediaSource> {
        self.uploads.lock().await.clone()
    }

    async fn schedules(&self) -> Vec<ScheduleCall> {
        self.schedules.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl PostPublisher for RecordingPublisher {
    fn is_authenticated(&self) -> bool {
        !self.unauthenticated
    }

    async fn upload_media(&self, source: MediaSource) -> Result<UploadResult, ScheduleError> {
        let n = {
            let mut uploads = self.uploads.lock().await;
            uploads.push(source);
            uploads.len()
        };
        let mut responses = self.upload_responses.lock().await;
        responses.pop_front().unwrap_or_else(|| {
            Ok(UploadResult {
                storage_object_id: format!("up-{}", n),
            })
        })
    }

    async fn schedule_post(
        &self,
        request: ScheduleRequest,
    ) -> Result<ScheduledPostHandle, ScheduleError> {
        let mut schedules = self.schedules.lock().await;
        schedules.push(ScheduleCall {
            media: request.media,
            caption: request.caption,
            title: request.title,
            channel_ids: request.channel_ids,
            schedule_at: format_instant(&request.schedule_at),
        });
        Ok(ScheduledPostHandle {
            post_id: format!("post-{}", schedules.len()),
            scheduled_at: format_instant(&request.schedule_at),
        })
    }
}

fn image(n: usize) -> CaptureItem {
    CaptureItem::with_image(
        format!("https://cdn.example/{}.jpg", n),
        format!("caption {}", n),
        "cats",
    )
}

fn request(items: Vec<CaptureItem>, channels: &[&str]) -> BulkScheduleRequest {
    BulkScheduleRequest {
        items,
        channel_ids: channels.iter().map(|c| c.to_string()).collect(),
        start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        interval_minutes: NonZeroU32::new(10).unwrap(),
    }
}

#[tokio::test(start_paused = true)]
async fn three_items_are_scheduled_at_interval_offsets() {
    let publisher = RecordingPublisher::default();
    let report = BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&request(vec![image(0), image(1), image(2)], &["c1"]))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 3);
    for (i, r) in report.results.iter().enumerate() {
        assert_eq!(r.index, i);
        assert!(r.success);
        assert_eq!(r.item, image(i));
    }
    assert!(report.safe_to_purge());

    let times: Vec<String> = publisher
        .schedules()
        .await
        .into_iter()
        .map(|c| c.schedule_at)
        .collect();
    assert_eq!(
        times,
        vec![
            "2024-01-01T00:00:00.000Z",
            "2024-01-01T00:10:00.000Z",
            "2024-01-01T00:20:00.000Z"
        ]
    );
}

#[tokio::test]
async fn empty_channel_list_fails_before_any_call() {
    let publisher = RecordingPublisher::default();
    let err = BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&request(vec![image(0)], &[]))
        .await
        .unwrap_err();

    assert!(matches!(err, ConfigError::EmptyChannels));
    assert!(publisher.uploads().await.is_empty());
    assert!(publisher.schedules().await.is_empty());
}

#[tokio::test]
async fn unauthenticated_run_fails_before_any_call() {
    let publisher = RecordingPublisher {
        unauthenticated: true,
        ..Default::default()
    };
    let err = BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&request(vec![image(0)], &["c1"]))
        .await
        .unwrap_err();

    assert!(matches!(err, ConfigError::MissingCredential(_)));
    assert!(publisher.schedules().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn items_with_storage_id_are_not_uploaded() {
    let publisher = RecordingPublisher::default();
    let mut pre_uploaded = image(0);
    pre_uploaded.storage_id = Some("stored-0".into());

    BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&request(vec![pre_uploaded, image(1)], &["c1"]))
        .await
        .unwrap();

    let uploads = publisher.uploads().await;
    assert_eq!(uploads, vec![MediaSource::RemoteUrl("https://cdn.example/1.jpg".into())]);

    let schedules = publisher.schedules().await;
    assert_eq!(schedules[0].media, MediaRef::StorageId("stored-0".into()));
    assert_eq!(schedules[1].media, MediaRef::StorageId("up-1".into()));
}

#[tokio::test(start_paused = true)]
async fn upload_failure_does_not_stop_the_batch() {
    let publisher = RecordingPublisher::with_upload_responses(vec![
        Ok(UploadResult {
            storage_object_id: "s0".into(),
        }),
        Err(UploadError::TooLarge {
            size: 60 * 1024 * 1024,
            limit: 50 * 1024 * 1024,
        }
        .into()),
    ]);

    let items = vec![image(0), image(1), image(2), image(3)];
    let report = BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&request(items, &["c1", "c2"]))
        .await
        .unwrap();

    assert_eq!(report.results.len(), 4);
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.failed(), 1);
    assert!(!report.safe_to_purge());

    let failed = &report.results[1];
    assert!(!failed.success);
    assert!(failed.result.is_none());
    assert!(failed.error.as_deref().unwrap().contains("too large"));

    // Each item is uploaded exactly once; the failed one is never scheduled.
    assert_eq!(publisher.uploads().await.len(), 4);
    let schedules = publisher.schedules().await;
    assert_eq!(schedules.len(), 3);
    let captions: Vec<&str> = schedules.iter().map(|c| c.caption.as_str()).collect();
    assert_eq!(captions, vec!["caption 0", "caption 2", "caption 3"]);
    assert_eq!(schedules[2].schedule_at, "2024-01-01T00:30:00.000Z");
}

#[tokio::test(start_paused = true)]
async fn caption_is_used_as_title_and_text_only_skips_upload() {
    let publisher = RecordingPublisher::default();
    BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&request(vec![CaptureItem::text_only("just words", "notes")], &["c1"]))
        .await
        .unwrap();

    assert!(publisher.uploads().await.is_empty());
    let call = &publisher.schedules().await[0];
    assert_eq!(call.media, MediaRef::None);
    assert_eq!(call.title.as_deref(), Some("just words"));
    assert_eq!(call.channel_ids, vec!["c1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn item_title_overrides_caption() {
    let publisher = RecordingPublisher::default();
    let mut titled = image(0);
    titled.title = Some("Own title".into());

    BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&request(vec![titled, image(1)], &["c1"]))
        .await
        .unwrap();

    let schedules = publisher.schedules().await;
    assert_eq!(schedules[0].title.as_deref(), Some("Own title"));
    assert_eq!(schedules[0].caption, "caption 0");
    assert_eq!(schedules[1].title.as_deref(), Some("caption 1"));
}

#[tokio::test]
async fn oversized_interval_fails_before_any_call() {
    let publisher = RecordingPublisher::default();
    let mut req = request((0..200).map(image).collect(), &["c1"]);
    req.interval_minutes = NonZeroU32::new(u32::MAX).unwrap();

    let err = BulkScheduler::new(Arc::new(publisher.clone()))
        .run(&req)
        .await
        .unwrap_err();

    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(publisher.uploads().await.is_empty());
    assert!(publisher.schedules().await.is_empty());
}
