//! Hand-rolled storage and model doubles for tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use crate::model::{ModelError, Part, VisionModel};
use crate::storage::{ObjectStore, StorageError, StoredObject};

/// A configurable mock response for [`MockModel`].
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(String),
}

/// An in-memory [`ObjectStore`] that records keys and counts calls.
///
/// Optionally fails every call from the `fail_from`-th (1-based) onwards.
pub struct MockStore {
    keys: Mutex<Vec<String>>,
    fail_from: Option<usize>,
    message: String,
    call_count: AtomicUsize,
}

impl MockStore {
    /// A store that accepts every object.
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            fail_from: None,
            message: String::new(),
            call_count: AtomicUsize::new(0),
        }
    }

    /// A store that rejects every object with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::failing_from(1, message)
    }

    /// A store that accepts the first `n - 1` objects and rejects the rest.
    pub fn failing_from(n: usize, message: impl Into<String>) -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            fail_from: Some(n),
            message: message.into(),
            call_count: AtomicUsize::new(0),
        }
    }

    /// How many times `put()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Keys of successfully stored objects, in write order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MockStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        _data: Bytes,
        _content_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject, StorageError>> + Send + 'a>> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            if self.fail_from.is_some_and(|n| call >= n) {
                return Err(StorageError::Backend(self.message.clone()));
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(StoredObject {
                bucket: "mock-bucket".into(),
                key: key.to_string(),
                download_token: None,
            })
        })
    }

    fn retrieval_url(&self, object: &StoredObject) -> String {
        format!("mock://{}/{}", object.bucket, object.key)
    }
}

/// A [`VisionModel`] that replays canned replies.
///
/// Supports a fixed reply for every call or a sequence (one per call,
/// repeating the last if exhausted). Every prompt is recorded.
pub struct MockModel {
    replies: Mutex<Vec<MockReply>>,
    fallback: MockReply,
    prompts: Mutex<Vec<Vec<Part>>>,
    call_count: AtomicUsize,
}

impl MockModel {
    /// Create a mock that always answers with `reply`.
    pub fn new(reply: MockReply) -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            fallback: reply,
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Create a mock that answers in order, repeating the last reply.
    pub fn with_sequence(mut replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "sequence must have at least one reply");
        // Reverse so we can pop() from the front cheaply.
        replies.reverse();
        let fallback = replies[0].clone();
        Self {
            replies: Mutex::new(replies),
            fallback,
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Shorthand for a sequence of successful replies.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_sequence(texts.into_iter().map(|t| MockReply::Text(t.into())).collect())
    }

    /// How many times `generate()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<Vec<Part>> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_reply(&self) -> MockReply {
        let mut seq = self.replies.lock().unwrap();
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl VisionModel for MockModel {
    fn generate<'a>(
        &'a self,
        parts: &'a [Part],
    ) -> Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(parts.to_vec());
        let reply = self.next_reply();
        Box::pin(async move {
            match reply {
                MockReply::Text(text) => Ok(text),
                MockReply::Error(msg) => Err(ModelError::Backend(msg)),
            }
        })
    }
}
