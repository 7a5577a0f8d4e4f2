//! Per-thread range events for evaluated backward nodes.

use dashmap::DashMap;
#[cfg(feature = "serde")]
use gradflow_core::error::{Error, Result};
use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, LazyLock, Mutex,
    },
    thread,
    time::Instant,
};

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Event {
    pub name: String,
    pub thread: String,
    pub start_us: u64,
    pub duration_us: u64,
}

type EventList = Arc<Mutex<Vec<Event>>>;

static ENABLED: AtomicBool = AtomicBool::new(false);
static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);
static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(0);
static EVENT_LISTS: LazyLock<DashMap<u64, EventList>> = LazyLock::new(DashMap::new);

thread_local! {
    static LOCAL_EVENTS: RefCell<Option<EventList>> = const { RefCell::new(None) };
}

fn local_events() -> EventList {
    LOCAL_EVENTS.with(|local| {
        local
            .borrow_mut()
            .get_or_insert_with(|| {
                let list: EventList = Arc::new(Mutex::new(Vec::new()));
                EVENT_LISTS.insert(NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed), list.clone());
                list
            })
            .clone()
    })
}

pub fn is_profiler_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Starts collecting events, discarding anything left from a previous run.
pub fn enable_profiler() {
    for entry in EVENT_LISTS.iter() {
        if let Ok(mut events) = entry.value().lock() {
            events.clear();
        }
    }
    LazyLock::force(&EPOCH);
    ENABLED.store(true, Ordering::Release);
}

/// Stops collecting and returns every thread's events ordered by start time.
///
/// Lists whose thread has exited are dropped from the registry.
pub fn disable_profiler() -> Vec<Event> {
    ENABLED.store(false, Ordering::Release);

    let mut events = Vec::new();
    for entry in EVENT_LISTS.iter() {
        if let Ok(mut list) = entry.value().lock() {
            events.append(&mut list);
        }
    }
    EVENT_LISTS.retain(|_, list| Arc::strong_count(list) > 1);

    events.sort_by_key(|e| e.start_us);
    events
}

/// Records a range event for its lifetime while the profiler is enabled.
pub struct RecordFunction {
    name: Option<String>,
    start: Instant,
}

impl RecordFunction {
    pub fn new(name: &str) -> Self {
        Self {
            name: is_profiler_enabled().then(|| name.to_string()),
            start: Instant::now(),
        }
    }
}

impl Drop for RecordFunction {
    fn drop(&mut self) {
        let Some(name) = self.name.take() else {
            return;
        };
        let current = thread::current();
        let event = Event {
            name,
            thread: current
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", current.id())),
            start_us: self.start.saturating_duration_since(*EPOCH).as_micros() as u64,
            duration_us: self.start.elapsed().as_micros() as u64,
        };
        if let Ok(mut events) = local_events().lock() {
            events.push(event);
        }
    }
}

/// Serialises events in the chrome://tracing format.
#[cfg(feature = "serde")]
pub fn to_chrome_trace(events: &[Event]) -> Result<String> {
    let trace: Vec<_> = events
        .iter()
        .map(|e| {
            serde_json::json!({
                "name": e.name,
                "ph": "X",
                "ts": e.start_us,
                "dur": e.duration_us,
                "pid": 0,
                "tid": e.thread,
            })
        })
        .collect();
    serde_json::to_string(&trace).map_err(|e| Error::SerializationError(e.to_string()))
}
