//! Event types for run execution.
//!
//! Events are emitted while runs execute to notify subscribers
//! about starts, progress, terminal states and logs.

mod run;

pub use run::*;

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

/// Event message addressed by run and scraper.
#[derive(Debug, Clone)]
pub struct Message {
    /// Run that generated this event (empty for queue-level events).
    pub run_id: String,
    /// Scraper the run belongs to.
    pub scraper_id: String,
    /// The actual event data.
    pub event: QueueEvent,
}

/// Log line emitted by a run.
#[derive(Debug, Clone)]
pub struct Log {
    pub run_id: String,
    pub scraper_id: String,
    pub content: String,
    /// Timestamp in milliseconds of the log entry.
    pub timestamp: i64,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl Message {
    pub fn new(
        run_id: &str,
        scraper_id: &str,
        event: QueueEvent,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            scraper_id: scraper_id.to_string(),
            event,
        }
    }
}
