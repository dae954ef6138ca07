//! Scriptable in-memory transport.
//!
//! Replies are matched by command prefix. A reply queue with more than one
//! entry is consumed in order; the last entry repeats forever. The
//! [`MockHandle`] stays with the test after the adapter has been moved into a
//! driver, so the transcript and the failure switch remain reachable.

use crate::adapters::HardwareAdapter;
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockHandle {
    transcript: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl MockHandle {
    /// Every command the driver sent, in order.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// While set, every send/query fails as if the link were wedged.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        if let Ok(mut t) = self.transcript.lock() {
            t.clear();
        }
    }
}

pub struct MockAdapter {
    replies: Vec<(String, VecDeque<String>)>,
    default_reply: String,
    handle: MockHandle,
}

impl MockAdapter {
    /// Unmatched commands are answered with `ok`.
    pub fn new() -> Self {
        Self {
            replies: Vec::new(),
            default_reply: "ok".to_string(),
            handle: MockHandle::default(),
        }
    }

    pub fn with_reply(self, prefix: &str, reply: &str) -> Self {
        self.with_replies(prefix, [reply])
    }

    pub fn with_replies<I, S>(mut self, prefix: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replies.push((
            prefix.to_string(),
            replies.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn respond(&mut self, command: &str) -> AppResult<String> {
        if !self.handle.is_connected() {
            return Err(ScanError::NotConnected("mock".to_string()));
        }
        if let Ok(mut t) = self.handle.transcript.lock() {
            t.push(command.to_string());
        }
        if self.handle.failing.load(Ordering::SeqCst) {
            return Err(ScanError::Instrument(format!("mock write of '{command}' failed")));
        }
        for (prefix, queue) in self.replies.iter_mut() {
            if command.starts_with(prefix.as_str()) {
                let reply = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                return Ok(reply.unwrap_or_default());
            }
        }
        Ok(self.default_reply.clone())
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    async fn connect(&mut self) -> AppResult<()> {
        self.handle.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        self.handle.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.respond(command).map(|_| ())
    }

    async fn query(&mut self, query: &str) -> AppResult<String> {
        self.respond(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reply_queue_is_consumed_then_repeats() {
        let mut adapter = MockAdapter::new().with_replies("CURVE?", ["1,2", "garbage", "3,4"]);
        let handle = adapter.handle();
        adapter.connect().await.unwrap();

        assert_eq!(adapter.query("CURVE?").await.unwrap(), "1,2");
        assert_eq!(adapter.query("CURVE?").await.unwrap(), "garbage");
        assert_eq!(adapter.query("CURVE?").await.unwrap(), "3,4");
        assert_eq!(adapter.query("CURVE?").await.unwrap(), "3,4");
        assert_eq!(adapter.query("M105").await.unwrap(), "ok");
        assert_eq!(handle.transcript().len(), 5);
    }

    #[tokio::test]
    async fn failing_switch_and_disconnect() {
        let mut adapter = MockAdapter::new();
        let handle = adapter.handle();

        assert!(matches!(
            adapter.send("G28").await,
            Err(ScanError::NotConnected(_))
        ));

        adapter.connect().await.unwrap();
        handle.set_failing(true);
        assert!(matches!(
            adapter.send("G28").await,
            Err(ScanError::Instrument(_))
        ));
        handle.set_failing(false);
        adapter.send("G28").await.unwrap();
        assert_eq!(handle.transcript(), vec!["G28", "G28"]);
    }
}
