// viewer-engine/src/updates.rs
use common::{generate_element_suffix, render_stream, StreamAction};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{LiveError, LiveResult};

/// What a push does to its target element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOperation {
    /// Create a uniquely named child under `{target}_create` and fill it
    CreateNamed,
    /// Replace the target's inner content
    Update,
    /// Replace the target element itself
    Replace,
    /// Remove the target element
    Remove,
}

/// Outbound content before normalization to a string
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Payload {
    /// Serialize any value as JSON content
    pub fn json<T: Serialize>(value: &T) -> LiveResult<Self> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| LiveError::InvalidPayload(e.to_string()))
    }

    /// Use a value's `Display` rendering as content
    pub fn display<T: Display>(value: &T) -> Self {
        Payload::Text(value.to_string())
    }

    /// Normalize to the string that goes on the wire
    pub fn into_content(self) -> LiveResult<String> {
        match self {
            Payload::Text(text) => Ok(text),
            Payload::Bytes(bytes) => String::from_utf8(bytes)
                .map_err(|e| LiveError::InvalidPayload(format!("bytes are not UTF-8: {}", e))),
            Payload::Json(serde_json::Value::String(text)) => Ok(text),
            Payload::Json(value) => serde_json::to_string(&value)
                .map_err(|e| LiveError::InvalidPayload(e.to_string())),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// Timing and markup options for one enqueue
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Defer the whole push without blocking the caller
    pub non_blocking_delay: Duration,
    /// Suspend the caller before pushing
    pub blocking_delay: Duration,
    /// Schedule a removal of the target after this long (zero: never)
    pub remove_after: Duration,
    /// Extra attributes for the element made by `CreateNamed`
    pub new_element_attributes: Option<String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(mut self, delay: Duration) -> Self {
        self.non_blocking_delay = delay;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.blocking_delay = delay;
        self
    }

    pub fn remove_after(mut self, after: Duration) -> Self {
        self.remove_after = after;
        self
    }

    pub fn attributes(mut self, attributes: impl Into<String>) -> Self {
        self.new_element_attributes = Some(attributes.into());
        self
    }
}

/// One pending wire mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUpdate {
    pub target: String,
    pub content: String,
    pub action: StreamAction,
}

impl QueuedUpdate {
    pub fn new(action: StreamAction, target: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            content: content.into(),
            action,
        }
    }

    pub fn render(&self) -> String {
        render_stream(self.action, &self.target, &self.content)
    }

    // Content the client holds for the target once this update lands
    fn cached_content(&self) -> &str {
        match self.action {
            StreamAction::Remove => "",
            _ => &self.content,
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedUpdate>,
    // Taken by the drain but not yet confirmed sent
    in_flight: Option<QueuedUpdate>,
    cache: HashMap<String, String>,
    draining: bool,
}

/// Per-viewer FIFO of pending updates plus the last-sent content cache.
///
/// `draining` is the single-flight flag: it is only flipped inside the lock,
/// so exactly one caller drains at a time and no push is stranded.
#[derive(Default)]
pub(crate) struct UpdateQueue {
    state: Mutex<QueueState>,
}

impl UpdateQueue {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // Poisoning only follows a panic elsewhere; the queue data is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append unconditionally; returns true if the caller must start draining
    pub fn push(&self, update: QueuedUpdate) -> bool {
        let mut state = self.lock();
        state.pending.push_back(update);
        Self::claim_drain(&mut state)
    }

    /// Append unless the target already holds (or is about to hold) this content.
    ///
    /// The newest pending item wins over the one being sent, which wins over
    /// the cache. Returns `(queued, start_drain)`.
    pub fn push_if_changed(&self, update: QueuedUpdate) -> (bool, bool) {
        let mut state = self.lock();
        let latest = state
            .pending
            .iter()
            .rev()
            .chain(state.in_flight.iter())
            .find(|queued| queued.target == update.target)
            .map(|queued| queued.cached_content().to_string())
            .or_else(|| state.cache.get(&update.target).cloned());

        if latest.as_deref() == Some(update.content.as_str()) {
            return (false, false);
        }

        state.pending.push_back(update);
        (true, Self::claim_drain(&mut state))
    }

    fn claim_drain(state: &mut QueueState) -> bool {
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    /// Next item for the active drain; releases the drain when empty.
    ///
    /// The item stays visible to `push_if_changed` until `record_sent` or
    /// `abort`.
    pub fn next(&self) -> Option<QueuedUpdate> {
        let mut state = self.lock();
        let next = state.pending.pop_front();
        state.in_flight = next.clone();
        if next.is_none() {
            state.draining = false;
        }
        next
    }

    /// Stop draining, leaving anything still queued unsent
    pub fn abort(&self) {
        let mut state = self.lock();
        state.in_flight = None;
        state.draining = false;
    }

    /// Stop draining and drop everything queued; the session has ended
    pub fn discard(&self) -> usize {
        let mut state = self.lock();
        state.in_flight = None;
        state.draining = false;
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    pub fn record_sent(&self, update: &QueuedUpdate) {
        let mut state = self.lock();
        state.in_flight = None;
        let content = update.cached_content().to_string();
        state.cache.insert(update.target.clone(), content);
    }

    /// Reserve a fresh child ID `{base}_{suffix}` with an empty cache entry
    pub fn reserve_child(&self, base: &str) -> String {
        let mut state = self.lock();
        loop {
            let candidate = format!("{}_{}", base, generate_element_suffix());
            if !state.cache.contains_key(&candidate) {
                state.cache.insert(candidate.clone(), String::new());
                return candidate;
            }
        }
    }

    pub fn cached(&self, target: &str) -> Option<String> {
        self.lock().cache.get(target).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    #[cfg(test)]
    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(target: &str, content: &str) -> QueuedUpdate {
        QueuedUpdate::new(StreamAction::Update, target, content)
    }

    #[test]
    fn test_payload_normalization_chain() {
        assert_eq!(Payload::from("hi").into_content().unwrap(), "hi");
        assert_eq!(Payload::from(b"bytes".to_vec()).into_content().unwrap(), "bytes");
        assert_eq!(Payload::from(json!({"a": 1})).into_content().unwrap(), r#"{"a":1}"#);
        assert_eq!(Payload::from(json!("plain")).into_content().unwrap(), "plain");
        assert_eq!(Payload::display(&42).into_content().unwrap(), "42");
        assert_eq!(Payload::json(&vec![1, 2]).unwrap().into_content().unwrap(), "[1,2]");
    }

    #[test]
    fn test_invalid_bytes_are_rejected() {
        let err = Payload::from(vec![0xff, 0xfe]).into_content().unwrap_err();
        assert!(matches!(err, LiveError::InvalidPayload(_)));
    }

    #[test]
    fn test_only_first_push_claims_the_drain() {
        let queue = UpdateQueue::default();
        assert!(queue.push(update("a", "1")));
        assert!(!queue.push(update("b", "2")));
        assert!(queue.is_draining());

        assert_eq!(queue.next().unwrap().target, "a");
        assert_eq!(queue.next().unwrap().target, "b");
        assert!(queue.next().is_none());
        assert!(!queue.is_draining());

        assert!(queue.push(update("c", "3")));
    }

    #[test]
    fn test_identical_update_is_suppressed_against_cache() {
        let queue = UpdateQueue::default();
        let first = update("main", "hello");
        assert_eq!(queue.push_if_changed(first.clone()), (true, true));
        let sent = queue.next().unwrap();
        queue.record_sent(&sent);
        assert!(queue.next().is_none());

        assert_eq!(queue.push_if_changed(first), (false, false));
        assert!(queue.push_if_changed(update("main", "changed")).0);
    }

    #[test]
    fn test_identical_update_is_suppressed_against_pending() {
        let queue = UpdateQueue::default();
        assert!(queue.push_if_changed(update("main", "x")).0);
        assert!(!queue.push_if_changed(update("main", "x")).0);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_identical_update_is_suppressed_while_in_flight() {
        let queue = UpdateQueue::default();
        assert_eq!(queue.push_if_changed(update("main", "same")), (true, true));
        let sending = queue.next().unwrap();

        assert_eq!(queue.push_if_changed(update("main", "same")), (false, false));
        assert_eq!(queue.pending_len(), 0);

        queue.record_sent(&sending);
        assert!(queue.next().is_none());
        assert_eq!(queue.push_if_changed(update("main", "same")), (false, false));
    }

    #[test]
    fn test_aborted_send_no_longer_suppresses() {
        let queue = UpdateQueue::default();
        queue.push_if_changed(update("main", "same"));
        queue.next();
        queue.abort();
        assert_eq!(queue.push_if_changed(update("main", "same")), (true, true));
    }

    #[test]
    fn test_discard_drops_pending() {
        let queue = UpdateQueue::default();
        queue.push(update("a", "1"));
        queue.push(update("b", "2"));
        queue.next();
        assert_eq!(queue.discard(), 1);
        assert_eq!(queue.pending_len(), 0);
        assert!(!queue.is_draining());
        assert!(queue.push_if_changed(update("a", "1")).0);
    }

    #[test]
    fn test_remove_blanks_cache() {
        let queue = UpdateQueue::default();
        queue.record_sent(&update("main", "x"));
        queue.record_sent(&QueuedUpdate::new(StreamAction::Remove, "main", "ignored"));
        assert_eq!(queue.cached("main").as_deref(), Some(""));
    }

    #[test]
    fn test_abort_leaves_items_queued() {
        let queue = UpdateQueue::default();
        queue.push(update("a", "1"));
        queue.push(update("b", "2"));
        queue.next();
        queue.abort();
        assert!(!queue.is_draining());
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_reserve_child_registers_placeholder() {
        let queue = UpdateQueue::default();
        let child = queue.reserve_child("list");
        assert!(child.starts_with("list_"));
        assert_eq!(queue.cached(&child).as_deref(), Some(""));
        assert_ne!(queue.reserve_child("list"), child);
    }

    #[test]
    fn test_options_builder() {
        let opts = EnqueueOptions::new()
            .defer(Duration::from_secs(1))
            .remove_after(Duration::from_secs(2))
            .attributes("class='x'");
        assert_eq!(opts.non_blocking_delay, Duration::from_secs(1));
        assert_eq!(opts.remove_after, Duration::from_secs(2));
        assert_eq!(opts.new_element_attributes.as_deref(), Some("class='x'"));
        assert!(opts.blocking_delay.is_zero());
    }
}
