use std::sync::Arc;

/// A queue as seen by the duplicate detector.
///
/// `id` must be stable for the lifetime of the process; it keys the
/// detector's per-queue timeout memo.
pub trait Queue {
    fn id(&self) -> &str;

    /// Seconds a claimed message stays hidden from other consumers.
    fn visibility_timeout(&self) -> Option<u32>;
}

/// A received unit of work.
pub trait Message {
    type Queue: Queue + ?Sized;

    fn id(&self) -> &str;

    /// The queue the message was received from, if known.
    fn queue(&self) -> Option<&Self::Queue>;
}

/// Plain queue descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRef {
    id: String,
    visibility_timeout: Option<u32>,
}

impl QueueRef {
    pub fn new(id: impl Into<String>, visibility_timeout: Option<u32>) -> Self {
        Self {
            id: id.into(),
            visibility_timeout,
        }
    }

    pub fn set_visibility_timeout(&mut self, secs: Option<u32>) {
        self.visibility_timeout = secs;
    }
}

impl Queue for QueueRef {
    fn id(&self) -> &str {
        &self.id
    }

    fn visibility_timeout(&self) -> Option<u32> {
        self.visibility_timeout
    }
}

/// Plain message carrier: an id and the queue it came from.
///
/// The queue is shared through an `Arc` since many messages usually
/// originate from the same queue.
#[derive(Debug, Clone)]
pub struct Envelope {
    id: String,
    queue: Option<Arc<QueueRef>>,
}

impl Envelope {
    pub fn new(id: impl Into<String>, queue: Arc<QueueRef>) -> Self {
        Self {
            id: id.into(),
            queue: Some(queue),
        }
    }

    /// A message that carries no queue reference.
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: None,
        }
    }
}

impl Message for Envelope {
    type Queue = QueueRef;

    fn id(&self) -> &str {
        &self.id
    }

    fn queue(&self) -> Option<&QueueRef> {
        self.queue.as_deref()
    }
}
