//! The single stateful pass over the source stream.
//!
//! Stages run in order: output processors, structured decoding, aggregation.
//! When the source ends the flush guard rejects whatever is still pending.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream;
use tokio::sync::watch;

use super::state::OutputCore;
use crate::chunk::{Chunk, ChunkPayload};
use crate::format::StructuredDecoder;
use crate::processor::Processed;
use crate::tee::ChunkStream;

enum Pulled {
    Chunk(Chunk),
    Aborted,
    End,
}

impl From<Option<Chunk>> for Pulled {
    fn from(next: Option<Chunk>) -> Self {
        next.map_or(Pulled::End, Pulled::Chunk)
    }
}

struct Pipeline {
    core: Arc<OutputCore>,
    source: ChunkStream,
    abort: Option<watch::Receiver<bool>>,
    decoder: Option<StructuredDecoder>,
    pending: VecDeque<Chunk>,
    halted: bool,
    flushed: bool,
}

pub(crate) fn processed_stream(
    core: Arc<OutputCore>,
    source: ChunkStream,
    abort: watch::Receiver<bool>,
) -> ChunkStream {
    let decoder = core
        .options
        .structured_output
        .as_ref()
        .map(StructuredDecoder::new);
    let pipeline = Pipeline {
        core,
        source,
        abort: Some(abort),
        decoder,
        pending: VecDeque::new(),
        halted: false,
        flushed: false,
    };
    stream::unfold(pipeline, |mut pipeline| async move {
        let chunk = pipeline.next().await?;
        Some((chunk, pipeline))
    })
    .boxed()
}

impl Pipeline {
    async fn next(&mut self) -> Option<Chunk> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            if self.halted {
                if !self.flushed {
                    self.flushed = true;
                    self.core.flush();
                }
                return None;
            }
            match self.pull().await {
                Pulled::Chunk(chunk) => self.process(chunk).await,
                Pulled::Aborted => {
                    if !self.core.is_terminated() {
                        let abort =
                            Chunk::new(self.core.options.run_id.clone(), ChunkPayload::Abort);
                        self.aggregate(abort).await;
                    }
                    self.halted = true;
                }
                Pulled::End => self.halted = true,
            }
        }
    }

    async fn pull(&mut self) -> Pulled {
        loop {
            let Some(abort) = self.abort.as_mut() else {
                return self.source.next().await.into();
            };
            if *abort.borrow() {
                return Pulled::Aborted;
            }
            let signal = tokio::select! {
                biased;
                changed = abort.changed() => Err(changed.is_ok()),
                next = self.source.next() => Ok(next),
            };
            match signal {
                Ok(next) => return next.into(),
                // Re-checked at the top of the loop.
                Err(true) => {}
                // Every abort handle is gone; nobody can cancel any more.
                Err(false) => self.abort = None,
            }
        }
    }

    async fn process(&mut self, chunk: Chunk) {
        if self.core.is_terminated() {
            self.pending.push_back(chunk);
            return;
        }
        let chunk = match self.core.processors.process_chunk(chunk.clone()).await {
            Processed::Pass(chunk) => chunk,
            Processed::Drop => return,
            Processed::Tripwire(reason) => {
                self.aggregate(chunk.sibling(ChunkPayload::Tripwire { reason }))
                    .await;
                self.halted = true;
                return;
            }
            Processed::Failed(error) => {
                self.aggregate(chunk.sibling(ChunkPayload::Error { error }))
                    .await;
                self.halted = true;
                return;
            }
        };
        let decoded = match &mut self.decoder {
            Some(decoder) => decoder.decode(chunk),
            None => vec![chunk],
        };
        for chunk in decoded {
            if self.aggregate(chunk).await {
                self.halted = true;
                break;
            }
        }
    }

    /// Queues the aggregator's output. Returns whether the pipeline must stop.
    async fn aggregate(&mut self, chunk: Chunk) -> bool {
        let outcome = self.core.aggregate(chunk).await;
        self.pending.extend(outcome.chunks);
        outcome.halt
    }
}
