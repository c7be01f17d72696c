//! Fan-out of one single-pass chunk stream to any number of readers.
//!
//! Chunks pulled from the source are appended to a shared buffer. Each branch
//! is only a cursor into that buffer, so every branch observes the same
//! sequence no matter when it was created or how fast it reads. Whichever
//! branch runs out of buffered chunks pulls the next one from the source.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, BoxStream};
use futures::StreamExt as _;

use crate::chunk::Chunk;

pub(crate) type ChunkStream = BoxStream<'static, Chunk>;

#[derive(Default)]
struct Buffer {
    chunks: Vec<Chunk>,
    done: bool,
}

pub(crate) struct ChunkTee {
    buffer: Mutex<Buffer>,
    source: tokio::sync::Mutex<Option<ChunkStream>>,
}

impl ChunkTee {
    pub(crate) fn new(source: ChunkStream) -> Self {
        Self {
            buffer: Mutex::new(Buffer::default()),
            source: tokio::sync::Mutex::new(Some(source)),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Some(chunk)` or `Some(None)` at the end; `None` when a pull is needed.
    fn buffered(&self, index: usize) -> Option<Option<Chunk>> {
        let buffer = self.buffer();
        match buffer.chunks.get(index) {
            Some(chunk) => Some(Some(chunk.clone())),
            None if buffer.done => Some(None),
            None => None,
        }
    }

    async fn next_at(&self, index: usize) -> Option<Chunk> {
        loop {
            if let Some(found) = self.buffered(index) {
                return found;
            }
            let mut source = self.source.lock().await;
            // Another branch may have pulled while we waited for the source.
            if let Some(found) = self.buffered(index) {
                return found;
            }
            let next = match source.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };
            match next {
                Some(chunk) => self.buffer().chunks.push(chunk),
                None => {
                    *source = None;
                    self.buffer().done = true;
                }
            }
        }
    }

    /// New reader starting at the first chunk of the run.
    pub(crate) fn branch(self: &Arc<Self>) -> ChunkStream {
        stream::unfold((Arc::clone(self), 0_usize), |(tee, index)| async move {
            let chunk = tee.next_at(index).await?;
            Some((chunk, (tee, index + 1)))
        })
        .boxed()
    }

    /// The source has been drained.
    pub(crate) fn is_finished(&self) -> bool {
        self.buffer().done
    }
}
