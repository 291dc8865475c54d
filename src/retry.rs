//! Progressive-delay retry with a per-class fallback target table.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::media::ContentClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const STANDARD: RetryPolicy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1000),
    };

    pub const HEAVY: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(2000),
    };

    pub fn for_class(class: ContentClass) -> Self {
        match class {
            ContentClass::Standard => Self::STANDARD,
            ContentClass::Heavy => Self::HEAVY,
        }
    }

    /// Delay observed before the attempt at `index` (0-based). The first
    /// attempt runs immediately.
    pub fn delay_before(&self, index: usize) -> Duration {
        self.base_delay * index as u32
    }
}

/// Ordered fallback targets keyed by content class. Attempt `i` uses entry
/// `i`; when the list is shorter than the attempt count the last entry is
/// reused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackTable {
    targets: BTreeMap<ContentClass, Vec<String>>,
}

static BUILTIN: Lazy<FallbackTable> = Lazy::new(|| {
    let mut table = FallbackTable::default();
    table.insert(
        ContentClass::Standard,
        vec![
            "gemini-2.5-flash-lite-preview-06-17".to_string(),
            "gemini-2.0-flash".to_string(),
        ],
    );
    table.insert(
        ContentClass::Heavy,
        vec![
            "gemini-2.5-flash".to_string(),
            "gemini-2.0-flash".to_string(),
            "gemini-2.5-flash-lite-preview-06-17".to_string(),
        ],
    );
    table
});

impl FallbackTable {
    pub fn builtin() -> &'static FallbackTable {
        &BUILTIN
    }

    pub fn insert(&mut self, class: ContentClass, targets: Vec<String>) {
        let targets: Vec<String> = targets
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        if targets.is_empty() {
            self.targets.remove(&class);
        } else {
            self.targets.insert(class, targets);
        }
    }

    pub fn target(&self, class: ContentClass, attempt_index: usize) -> Option<&str> {
        let list = self.targets.get(&class)?;
        list.get(attempt_index)
            .or_else(|| list.last())
            .map(String::as_str)
    }
}

/// One attempt handed to the retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: usize,
    /// Fallback target for this attempt, if the table has one for the class.
    pub target: Option<String>,
}

#[derive(Debug, Error)]
pub enum RetryError<E: Display> {
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: E },
}

impl<E: Display> RetryError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping
/// `base_delay * index` before each attempt.
pub async fn invoke_with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    table: &FallbackTable,
    class: ContentClass,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut index = 0;
    loop {
        let delay = policy.delay_before(index);
        if !delay.is_zero() {
            debug!(
                attempt = index + 1,
                delay_ms = delay.as_millis() as u64,
                "waiting before retry"
            );
            sleep(delay).await;
        }
        let attempt = Attempt {
            number: index + 1,
            target: table.target(class, index).map(str::to_string),
        };
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt = index + 1, attempts, error = %err, "attempt failed");
                index += 1;
                if index >= attempts {
                    return Err(RetryError::Exhausted { attempts, last: err });
                }
            }
        }
    }
}

/// Retry policies plus the fallback table, bundled for a client.
#[derive(Debug, Clone)]
pub struct RetryController {
    table: FallbackTable,
    standard: RetryPolicy,
    heavy: RetryPolicy,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(FallbackTable::builtin().clone())
    }
}

impl RetryController {
    pub fn new(table: FallbackTable) -> Self {
        Self {
            table,
            standard: RetryPolicy::STANDARD,
            heavy: RetryPolicy::HEAVY,
        }
    }

    pub fn with_policy(mut self, class: ContentClass, policy: RetryPolicy) -> Self {
        match class {
            ContentClass::Standard => self.standard = policy,
            ContentClass::Heavy => self.heavy = policy,
        }
        self
    }

    pub fn policy(&self, class: ContentClass) -> RetryPolicy {
        match class {
            ContentClass::Standard => self.standard,
            ContentClass::Heavy => self.heavy,
        }
    }

    pub fn table(&self) -> &FallbackTable {
        &self.table
    }

    pub async fn run<T, E, F, Fut>(&self, class: ContentClass, op: F) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        invoke_with_retry(self.policy(class), &self.table, class, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn table() -> FallbackTable {
        let mut t = FallbackTable::default();
        t.insert(ContentClass::Standard, vec!["a".into(), "b".into()]);
        t.insert(ContentClass::Heavy, vec!["v".into()]);
        t
    }

    #[test]
    fn class_policies() {
        assert_eq!(RetryPolicy::for_class(ContentClass::Standard).max_attempts, 2);
        assert_eq!(RetryPolicy::for_class(ContentClass::Heavy).max_attempts, 3);
        assert_eq!(RetryPolicy::HEAVY.delay_before(2), Duration::from_millis(4000));
        assert_eq!(RetryPolicy::STANDARD.delay_before(0), Duration::ZERO);
    }

    #[test]
    fn table_reuses_last_entry() {
        let t = table();
        assert_eq!(t.target(ContentClass::Standard, 0), Some("a"));
        assert_eq!(t.target(ContentClass::Standard, 1), Some("b"));
        assert_eq!(t.target(ContentClass::Standard, 5), Some("b"));
        assert_eq!(t.target(ContentClass::Heavy, 2), Some("v"));
        assert_eq!(FallbackTable::default().target(ContentClass::Heavy, 0), None);
    }

    #[test]
    fn builtin_table_has_both_classes() {
        let t = FallbackTable::builtin();
        assert!(t.target(ContentClass::Standard, 0).is_some());
        assert!(t.target(ContentClass::Heavy, 0).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_second_attempt_with_fallback_target() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();
        let t = table();
        let result = invoke_with_retry(
            RetryPolicy::STANDARD,
            &t,
            ContentClass::Standard,
            |attempt| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(attempt.clone());
                    if attempt.number == 1 {
                        Err("first fails".to_string())
                    } else {
                        Ok(attempt.target.unwrap_or_default())
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, "b");
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn heavy_exhaustion_names_attempts_and_last_error() {
        let started = Instant::now();
        let controller = RetryController::new(table());
        let err = controller
            .run(ContentClass::Heavy, |attempt| async move {
                Err::<(), _>(format!("boom {}", attempt.number))
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.to_string(), "failed after 3 attempts: boom 3");
        // 0 + 2000 + 4000
        assert!(started.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_is_not_delayed() {
        let started = Instant::now();
        let controller = RetryController::default();
        let value = controller
            .run(ContentClass::Standard, |_| async { Ok::<_, String>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
