//! Status events and the busy flag reported to whoever drives a split.
//!
//! The engine never renders anything. It hands [`ProgressEvent`]s to a
//! [`ProgressSink`], and the caller decides how to show them.

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

/// Severity of a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Success,
    Error,
}

impl Level {
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Success => "success",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single human-readable status line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub level: Level,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl ProgressEvent {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Local::now(),
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<7} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level.as_str().to_uppercase(),
            self.message
        )
    }
}

/// Receiver of status events and busy transitions.
///
/// Calls arrive synchronously on the thread running the split, so
/// implementations should queue work rather than redraw in place.
pub trait ProgressSink: Send {
    fn on_event(&self, event: &ProgressEvent);
    fn on_busy(&self, busy: bool);
}

impl<S: ProgressSink + Sync + ?Sized> ProgressSink for Arc<S> {
    fn on_event(&self, event: &ProgressEvent) {
        (**self).on_event(event);
    }

    fn on_busy(&self, busy: bool) {
        (**self).on_busy(busy);
    }
}

/// Adapts a pair of closures, `on_event(message, level)` and `on_busy(busy)`.
pub struct FnSink<E, B> {
    on_event: E,
    on_busy: B,
}

impl<E, B> FnSink<E, B>
where
    E: Fn(&str, Level) + Send,
    B: Fn(bool) + Send,
{
    pub fn new(on_event: E, on_busy: B) -> Self {
        Self { on_event, on_busy }
    }
}

impl<E, B> ProgressSink for FnSink<E, B>
where
    E: Fn(&str, Level) + Send,
    B: Fn(bool) + Send,
{
    fn on_event(&self, event: &ProgressEvent) {
        (self.on_event)(&event.message, event.level);
    }

    fn on_busy(&self, busy: bool) {
        (self.on_busy)(busy);
    }
}

/// What a channel sink sends.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Event(ProgressEvent),
    Busy(bool),
}

/// Forwards everything over a channel so a UI loop can drain it on its own thread.
/// A disconnected receiver is ignored.
impl ProgressSink for Sender<Message> {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.send(Message::Event(event.clone()));
    }

    fn on_busy(&self, busy: bool) {
        let _ = self.send(Message::Busy(busy));
    }
}

/// Collects every event and busy transition in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ProgressEvent>>,
    busy: Mutex<Vec<bool>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the events received so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Events at `level`, messages only.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }

    /// Every busy transition in the order received.
    pub fn busy_transitions(&self) -> Vec<bool> {
        self.busy.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ProgressSink for EventLog {
    fn on_event(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }

    fn on_busy(&self, busy: bool) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(busy);
    }
}

/// Thin helper the pipeline stages use to report milestones.
#[derive(Clone, Copy)]
pub struct Emitter<'a> {
    sink: &'a dyn ProgressSink,
}

impl<'a> Emitter<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self { sink }
    }

    pub fn emit(&self, level: Level, message: impl Into<String>) {
        let event = ProgressEvent::new(level, message);
        tracing::debug!(level = event.level.as_str(), message = %event.message, "progress");
        self.sink.on_event(&event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Level::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(Level::Warning, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(Level::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Level::Error, message);
    }
}

/// Reports busy on creation and idle on drop, so the idle transition happens
/// exactly once however the run ends.
pub struct BusyGuard<'a> {
    sink: &'a dyn ProgressSink,
}

impl<'a> BusyGuard<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        sink.on_busy(true);
        Self { sink }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.sink.on_busy(false);
    }
}
