//! Issue tracker integration seam.
//!
//! Task records can mirror into an external issue tracker via the
//! [`IssueTracker`] trait. The crate itself only talks to the trait; a real
//! backend lives behind it, and commands that run without one use
//! [`NullTracker`], which records the calls it would have made. All tracker
//! traffic is paced by a [`RateLimiter`] so bursts of record changes do not
//! hammer an external API.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::record::TaskRecord;

/// Opaque reference to an issue in the external tracker, stored in a
/// record's `external_ref` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerRef(pub String);

/// Snapshot of an issue as the tracker sees it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueView {
    /// Tracker-side state, e.g. "open" or "closed"
    pub state: String,
    pub labels: Vec<String>,
    pub body: String,
}

impl std::fmt::Display for TrackerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operations a tracker backend must support
pub trait IssueTracker {
    /// Create an issue mirroring a record; returns its tracker reference
    fn create(&self, record: &TaskRecord) -> Result<TrackerRef>;

    /// Update the issue body to match the record's current content
    fn update(&self, issue: &TrackerRef, record: &TaskRecord) -> Result<()>;

    /// Fetch the issue's current state, labels, and body
    fn view(&self, issue: &TrackerRef) -> Result<IssueView>;

    /// Append a comment
    fn comment(&self, issue: &TrackerRef, text: &str) -> Result<()>;

    fn add_label(&self, issue: &TrackerRef, label: &str) -> Result<()>;

    fn remove_label(&self, issue: &TrackerRef, label: &str) -> Result<()>;
}

/// Minimum-interval pacing between tracker calls.
///
/// `pause` blocks until at least the configured interval has elapsed since
/// the previous call, then stamps the current time. Interior mutability so
/// a shared tracker wrapper can pace from `&self`.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_call: Mutex::new(None),
        }
    }

    /// Block until the interval since the last call has elapsed
    pub fn pause(&self) {
        let mut last = self.last_call.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

/// Tracker wrapper that paces every call through a [`RateLimiter`]
pub struct PacedTracker<T> {
    inner: T,
    limiter: RateLimiter,
}

impl<T: IssueTracker> PacedTracker<T> {
    pub fn new(inner: T, config: &TrackerConfig) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(config),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: IssueTracker> IssueTracker for PacedTracker<T> {
    fn create(&self, record: &TaskRecord) -> Result<TrackerRef> {
        self.limiter.pause();
        self.inner.create(record)
    }

    fn update(&self, issue: &TrackerRef, record: &TaskRecord) -> Result<()> {
        self.limiter.pause();
        self.inner.update(issue, record)
    }

    fn view(&self, issue: &TrackerRef) -> Result<IssueView> {
        self.limiter.pause();
        self.inner.view(issue)
    }

    fn comment(&self, issue: &TrackerRef, text: &str) -> Result<()> {
        self.limiter.pause();
        self.inner.comment(issue, text)
    }

    fn add_label(&self, issue: &TrackerRef, label: &str) -> Result<()> {
        self.limiter.pause();
        self.inner.add_label(issue, label)
    }

    fn remove_label(&self, issue: &TrackerRef, label: &str) -> Result<()> {
        self.limiter.pause();
        self.inner.remove_label(issue, label)
    }
}

/// No-backend tracker: records every call and invents stable references.
/// Used for dry runs and in tests.
#[derive(Debug, Default)]
pub struct NullTracker {
    calls: Mutex<Vec<String>>,
}

impl NullTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn log(&self, entry: String) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }
}

impl IssueTracker for NullTracker {
    fn create(&self, record: &TaskRecord) -> Result<TrackerRef> {
        self.log(format!("create #{}", record.meta.id));
        Ok(TrackerRef(format!("local-{}", record.meta.id)))
    }

    fn update(&self, issue: &TrackerRef, record: &TaskRecord) -> Result<()> {
        self.log(format!("update {issue} from #{}", record.meta.id));
        Ok(())
    }

    fn view(&self, issue: &TrackerRef) -> Result<IssueView> {
        self.log(format!("view {issue}"));
        Ok(IssueView {
            state: "open".to_string(),
            ..IssueView::default()
        })
    }

    fn comment(&self, issue: &TrackerRef, text: &str) -> Result<()> {
        self.log(format!("comment {issue}: {text}"));
        Ok(())
    }

    fn add_label(&self, issue: &TrackerRef, label: &str) -> Result<()> {
        self.log(format!("add_label {issue}: {label}"));
        Ok(())
    }

    fn remove_label(&self, issue: &TrackerRef, label: &str) -> Result<()> {
        self.log(format!("remove_label {issue}: {label}"));
        Ok(())
    }
}

/// Mirror reconciliation results into a tracker: create issues for records
/// without an `external_ref`, update the rest. Returns the refs created,
/// keyed by task id, so the caller can persist them.
pub fn mirror_records<T: IssueTracker>(
    tracker: &T,
    records: &[TaskRecord],
) -> Result<Vec<(u32, TrackerRef)>> {
    let mut created = Vec::new();
    for record in records {
        match &record.meta.external_ref {
            Some(existing) => tracker.update(&TrackerRef(existing.clone()), record)?,
            None => {
                let issue = tracker.create(record)?;
                tracing::debug!(task = record.meta.id, issue = %issue, "created tracker issue");
                created.push((record.meta.id, issue));
            }
        }
    }
    Ok(created)
}
