//! Bounded handoff queue between the capture loop and the dialogue task.
//!
//! Capture never waits: when the queue is full the oldest chunk is dropped.

use async_trait::async_trait;
use puppet_dialogue::{AudioChunk, ChunkSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug)]
struct Inner {
    chunks: Mutex<VecDeque<AudioChunk>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

/// Drop-oldest chunk queue; clones share the same buffer
#[derive(Debug, Clone)]
pub struct ChunkQueue {
    inner: Arc<Inner>,
}

impl ChunkQueue {
    /// Create a queue holding at most `capacity` chunks
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                chunks: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                pushed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue without blocking; returns `false` if an older chunk was dropped
    pub fn push(&self, chunk: AudioChunk) -> bool {
        let evicted = {
            let mut chunks = self
                .inner
                .chunks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let evicted = if chunks.len() >= self.inner.capacity {
                chunks.pop_front().is_some()
            } else {
                false
            };
            chunks.push_back(chunk);
            evicted
        };

        self.inner.pushed.fetch_add(1, Ordering::Relaxed);
        if evicted {
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped, "Audio queue full, dropped oldest chunk");
        }
        self.inner.notify.notify_one();
        !evicted
    }

    /// Take the oldest chunk if one is ready
    pub fn try_pop(&self) -> Option<AudioChunk> {
        self.inner
            .chunks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Wait for the next chunk; `None` once closed and drained
    pub async fn recv(&self) -> Option<AudioChunk> {
        loop {
            if let Some(chunk) = self.try_pop() {
                return Some(chunk);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Stop accepting waits; pending chunks can still be drained
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Whether [`close`](Self::close) was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Chunks waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .chunks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether no chunk is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum buffered chunks
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Chunks accepted since creation
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.inner.pushed.load(Ordering::Relaxed)
    }

    /// Chunks evicted because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChunkSource for ChunkQueue {
    async fn recv(&mut self) -> Option<AudioChunk> {
        ChunkQueue::recv(self).await
    }

    fn try_recv(&mut self) -> Option<AudioChunk> {
        self.try_pop()
    }
}
