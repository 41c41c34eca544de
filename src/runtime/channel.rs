use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::{
    Result, ScrapeflowError, ShareLock,
    common::{BroadcastQueue, Shutdown},
    events::{Event, Log, Message, Progress, RunSummary},
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        if let Ok(handlers) = $handles.read() {
            for handle in handlers.iter() {
                (handle)($(&$item),+);
            }
        }
    };
}

macro_rules! dispatch_event_async {
    ($handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        tokio::spawn(async move {
            let handlers = match handles.read() {
                Ok(handlers) => handlers.clone(),
                Err(_) => return,
            };
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 2048;
const LOG_QUEUE_SIZE: usize = 4096;

pub type QueueEventHandle = Arc<dyn Fn(&Event<Message>) + Send + Sync>;
pub type QueueLogHandle = Arc<dyn Fn(&Event<Log>) + Send + Sync>;
pub type QueueEventHandleAsync = Arc<dyn Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type QueueLogHandleAsync = Arc<dyn Fn(&Event<Log>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// use the glob pattern to match the run id
    /// eg. run1*
    pub run: String,

    /// use the glob pattern to match the scraper id
    /// eg. jobs-*
    pub scraper: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            run: "*".to_string(),
            scraper: "*".to_string(),
        }
    }
}

#[allow(unused)]
impl ChannelOptions {
    pub fn new(
        run: String,
        scraper: String,
    ) -> Self {
        Self {
            run,
            scraper,
        }
    }

    pub fn with_run(run: String) -> Self {
        Self {
            run,
            scraper: "*".to_string(),
        }
    }

    pub fn with_scraper(scraper: String) -> Self {
        Self {
            run: "*".to_string(),
            scraper,
        }
    }
}

/// Fan-out point between runs and their live subscribers.
#[derive(Clone)]
pub struct Channel {
    event_queue: Arc<BroadcastQueue<Event<Message>>>,
    log_queue: Arc<BroadcastQueue<Event<Log>>>,

    events: ShareLock<Vec<QueueEventHandle>>,
    logs: ShareLock<Vec<QueueLogHandle>>,
    events_async: ShareLock<Vec<QueueEventHandleAsync>>,
    logs_async: ShareLock<Vec<QueueLogHandleAsync>>,

    handle: Option<Handle>,
    shutdown: Arc<Shutdown>,
}

impl Channel {
    pub fn new(handle: Handle) -> Self {
        Self::build(Some(handle))
    }

    /// A channel nobody listens to, used by worker-side runs.
    pub fn detached() -> Self {
        Self::build(None)
    }

    fn build(handle: Option<Handle>) -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            log_queue: BroadcastQueue::new(LOG_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            logs: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            logs_async: Arc::new(RwLock::new(Vec::new())),
            handle,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub fn emit(
        &self,
        message: Message,
    ) {
        let _ = self.event_queue.send(Event::new(&message));
    }

    pub fn emit_log(
        &self,
        log: Log,
    ) {
        let _ = self.log_queue.send(Event::new(&log));
    }

    pub(crate) fn listen(&self) {
        let Some(handle) = self.handle.as_ref() else {
            return;
        };
        let mut event_queue = self.event_queue.subscribe();
        let mut log_queue = self.log_queue.subscribe();
        let events = self.events.clone();
        let logs = self.logs.clone();
        let events_async = self.events_async.clone();
        let logs_async = self.logs_async.clone();

        let shutdown = self.shutdown.clone();
        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(events_async, &e);
                    }
                    Ok(log) = log_queue.recv() => {
                        let l = log.clone();
                        dispatch_event!(logs, &l);
                        dispatch_event_async!(logs_async, &log);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

/// Filtered registration surface for channel listeners.
#[derive(Clone)]
pub struct ChannelEvent {
    channel: Arc<Channel>,

    glob: (globset::GlobMatcher, globset::GlobMatcher),
}

#[allow(unused)]
impl ChannelEvent {
    pub fn channel(
        channel: Arc<Channel>,
        options: ChannelOptions,
    ) -> Result<Self> {
        let compile = |pattern: &str| {
            globset::Glob::new(pattern).map(|glob| glob.compile_matcher()).map_err(|e| ScrapeflowError::Engine(format!("invalid listener pattern '{}': {}", pattern, e)))
        };
        Ok(Self {
            channel,
            glob: (compile(&options.run)?, compile(&options.scraper)?),
        })
    }

    fn push(
        &self,
        handle: QueueEventHandle,
    ) {
        if let Ok(mut events) = self.channel.events.write() {
            events.push(handle);
        }
    }

    pub fn on_started(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push(Arc::new(move |e| {
            if matches!(e.event, crate::events::QueueEvent::Started(_)) && is_match(&glob, &e.run_id, &e.scraper_id) {
                f(e);
            }
        }));
    }

    /// Called once per run reaching any terminal state.
    pub fn on_complete(
        &self,
        f: impl Fn(&RunSummary) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push(Arc::new(move |e| {
            if let Some(summary) = e.event.summary() {
                if is_match(&glob, &e.run_id, &e.scraper_id) {
                    f(summary);
                }
            }
        }));
    }

    pub fn on_error(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push(Arc::new(move |e| {
            if e.event.is_error() && is_match(&glob, &e.run_id, &e.scraper_id) {
                f(e);
            }
        }));
    }

    pub fn on_progress(
        &self,
        f: impl Fn(&str, &Progress) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push(Arc::new(move |e| {
            if let crate::events::QueueEvent::Progress(progress) = &e.event {
                if is_match(&glob, &e.run_id, &e.scraper_id) {
                    f(&e.run_id, progress);
                }
            }
        }));
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push(Arc::new(move |e| {
            if is_match(&glob, &e.run_id, &e.scraper_id) {
                f(e);
            }
        }));
    }

    pub fn on_log(
        &self,
        f: impl Fn(&Event<Log>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        if let Ok(mut logs) = self.channel.logs.write() {
            logs.push(Arc::new(move |e| {
                if is_match(&glob, &e.run_id, &e.scraper_id) {
                    f(e);
                }
            }));
        }
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        if let Ok(mut events) = self.channel.events_async.write() {
            events.push(Arc::new(move |e| {
                if is_match(&glob, &e.run_id, &e.scraper_id) {
                    f(e)
                } else {
                    Box::pin(async {})
                }
            }));
        }
    }

    pub fn on_log_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Log>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        if let Ok(mut logs) = self.channel.logs_async.write() {
            logs.push(Arc::new(move |e| {
                if is_match(&glob, &e.run_id, &e.scraper_id) {
                    f(e)
                } else {
                    Box::pin(async {})
                }
            }));
        }
    }
}

fn is_match(
    glob: &(globset::GlobMatcher, globset::GlobMatcher),
    run_id: &str,
    scraper_id: &str,
) -> bool {
    let (pat_run, pat_scraper) = glob;
    pat_run.is_match(run_id) && pat_scraper.is_match(scraper_id)
}
