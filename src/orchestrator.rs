//! Sequential bulk scheduling over a batch of capture items.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigError;
use crate::error::ScheduleError;
use crate::model::{
    format_instant, BulkItemResult, BulkScheduleRequest, CaptureItem, ItemState,
    ScheduledPostHandle,
};
use crate::scheduler::{MediaRef, PostPublisher, ScheduleRequest};
use crate::uploader::MediaSource;

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(1000);

type ProgressFn = dyn Fn(usize, ItemState) + Send + Sync;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BulkScheduleReport {
    pub results: Vec<BulkItemResult>,
}

impl BulkScheduleReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// The source batch may be removed only when every item succeeded.
    pub fn safe_to_purge(&self) -> bool {
        self.failed() == 0
    }
}

pub struct BulkScheduler {
    publisher: Arc<dyn PostPublisher>,
    item_delay: Duration,
    progress: Option<Box<ProgressFn>>,
}

impl BulkScheduler {
    pub fn new(publisher: Arc<dyn PostPublisher>) -> Self {
        Self {
            publisher,
            item_delay: DEFAULT_ITEM_DELAY,
            progress: None,
        }
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Observe per-item state transitions.
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, ItemState) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(f));
        self
    }

    fn transition(&self, index: usize, state: ItemState) {
        debug!(index, state = state.as_str(), "item state");
        if let Some(progress) = &self.progress {
            progress(index, state);
        }
    }

    /// Schedule every item in order. Per-item failures are recorded in the
    /// report; only pre-flight configuration problems return an error.
    #[instrument(
        skip_all,
        fields(items = request.items.len(), channels = request.channel_ids.len())
    )]
    pub async fn run(
        &self,
        request: &BulkScheduleRequest,
    ) -> Result<BulkScheduleReport, ConfigError> {
        if request.channel_ids.is_empty() {
            return Err(ConfigError::EmptyChannels);
        }
        if !self.publisher.is_authenticated() {
            return Err(ConfigError::MissingCredential("posting.api_key"));
        }
        let times = request.schedule_times()?;

        let total = request.items.len();
        let mut results = Vec::with_capacity(total);
        for (index, (item, schedule_at)) in request.items.iter().zip(times).enumerate() {
            self.transition(index, ItemState::Pending);
            info!(
                index,
                total,
                schedule_at = %format_instant(&schedule_at),
                "scheduling item"
            );

            let result = match self
                .schedule_item(index, item, &request.channel_ids, schedule_at)
                .await
            {
                Ok(handle) => {
                    self.transition(index, ItemState::Succeeded);
                    info!(index, post_id = %handle.post_id, "item scheduled");
                    BulkItemResult {
                        index,
                        success: true,
                        result: Some(handle),
                        error: None,
                        item: item.clone(),
                    }
                }
                Err(err) => {
                    self.transition(index, ItemState::Failed);
                    warn!(index, error = %err, "item failed");
                    BulkItemResult {
                        index,
                        success: false,
                        result: None,
                        error: Some(err.to_string()),
                        item: item.clone(),
                    }
                }
            };
            results.push(result);

            sleep(self.item_delay).await;
        }

        let report = BulkScheduleReport { results };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "bulk scheduling finished"
        );
        Ok(report)
    }

    async fn schedule_item(
        &self,
        index: usize,
        item: &CaptureItem,
        channel_ids: &[String],
        schedule_at: DateTime<Utc>,
    ) -> Result<ScheduledPostHandle, ScheduleError> {
        let media = if let Some(storage_id) = item.storage_ref() {
            MediaRef::StorageId(storage_id.to_string())
        } else if item.is_text_only {
            MediaRef::None
        } else if let Some(url) = item.image_ref() {
            self.transition(index, ItemState::Uploading);
            let uploaded = self
                .publisher
                .upload_media(MediaSource::RemoteUrl(url.to_string()))
                .await?;
            MediaRef::StorageId(uploaded.storage_object_id)
        } else {
            return Err(ScheduleError::MissingMedia);
        };

        self.transition(index, ItemState::Scheduling);
        self.publisher
            .schedule_post(ScheduleRequest {
                media,
                caption: item.caption.clone(),
                channel_ids: channel_ids.to_vec(),
                schedule_at,
                title: Some(item.post_title().to_string()),
                is_draft: false,
            })
            .await
    }
}
