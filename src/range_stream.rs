use std::{
    collections::VecDeque,
    future::Future,
    io::{self, Read},
    ops::Range,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::{
    error::{Result, SourceError},
    scheduler::{Cancellation, Scheduler, Task},
    source::{Entry, VirtualSource},
};

/// Resolves optional `[start, end)` offsets against an entry.
///
/// Omitted offsets cover the whole entry and `end` is clamped to its length. A start past
/// the end of the entry, or past the clamped end, is out of bounds.
pub fn resolve_range(entry: &Entry, start: Option<u64>, end: Option<u64>) -> Result<Range<u64>> {
    let start = start.unwrap_or(0);
    let requested_end = end.unwrap_or(entry.length);
    let end = requested_end.min(entry.length);

    if start > entry.length || start > end {
        return Err(SourceError::RangeOutOfBounds {
            path: entry.path.clone(),
            start,
            end: requested_end,
            length: entry.length,
        });
    }

    Ok(start..end)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamOptions {
    pub buffer_size: usize,
    pub queue_depth: usize,
}

/// The reading side of a stream, moved into one scheduler unit per buffer.
struct Producer {
    source: Arc<dyn VirtualSource>,
    entry: Entry,
    start: u64,
    remaining: u64,
    buffer_size: usize,
    reader: Option<Box<dyn Read + Send>>,
}

impl Producer {
    fn next_buffer(&mut self, cancel: &Cancellation) -> Result<Bytes> {
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => self
                .source
                .open_range(&self.entry, self.start..self.start + self.remaining)?,
        };

        let size = (self.buffer_size as u64).min(self.remaining) as usize;
        let mut buf = BytesMut::zeroed(size);
        let mut filled = 0;
        while filled < size {
            cancel.check()?;
            match reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(SourceError::Io {
                        path: self.entry.path.clone(),
                        source: io::ErrorKind::UnexpectedEof.into(),
                    })
                }
                Ok(n) => filled += n,
                // Still decoding towards the range start.
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(SourceError::io(&self.entry.path, e)),
            }
        }

        self.remaining -= size as u64;
        self.reader = Some(reader);
        Ok(buf.freeze())
    }
}

type Unit = Task<(Producer, Result<Bytes>)>;

fn schedule(scheduler: &Scheduler, mut producer: Producer) -> Unit {
    scheduler.run(move |cancel| {
        let result = producer.next_buffer(cancel);
        (producer, result)
    })
}

/// Bytes of one entry range, produced in order on the scheduler.
///
/// Every buffer is read by its own unit, and a new unit is only queued while fewer than
/// `queue_depth` buffers wait for the consumer, so an idle stream holds no worker.
/// Dropping the stream cancels the unit in flight and releases its reader (and any
/// decompression state).
pub struct RangeStream {
    scheduler: Scheduler,
    options: StreamOptions,
    producer: Option<Producer>,
    in_flight: Option<Unit>,
    ready: VecDeque<Result<Bytes>>,
    len: u64,
}

impl RangeStream {
    pub(crate) fn spawn(
        scheduler: &Scheduler,
        source: Arc<dyn VirtualSource>,
        entry: Entry,
        range: Range<u64>,
        options: StreamOptions,
    ) -> Self {
        let len = range.end - range.start;
        let options = StreamOptions {
            buffer_size: options.buffer_size.max(1),
            queue_depth: options.queue_depth.max(1),
        };

        let producer = Producer {
            source,
            entry,
            start: range.start,
            remaining: len,
            buffer_size: options.buffer_size,
            reader: None,
        };

        // The first buffer is read ahead right away.
        let in_flight = (len > 0).then(|| schedule(scheduler, producer));

        Self {
            scheduler: scheduler.clone(),
            options,
            producer: None,
            in_flight,
            ready: VecDeque::new(),
            len,
        }
    }

    /// Total number of bytes the stream yields when consumed to the end.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drains the stream into memory.
    pub async fn into_vec(mut self) -> Result<Vec<u8>> {
        let read_ahead = self
            .options
            .buffer_size
            .saturating_mul(self.options.queue_depth);
        let capacity = usize::try_from(self.len).unwrap_or(usize::MAX).min(read_ahead);

        let mut out = Vec::with_capacity(capacity);
        while let Some(buf) = self.next().await {
            out.extend_from_slice(&buf?);
        }
        Ok(out)
    }

    fn poll_in_flight(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(task) = self.in_flight.as_mut() else {
            return false;
        };
        let Poll::Ready(result) = Pin::new(task).poll(cx) else {
            return false;
        };

        self.in_flight = None;
        match result {
            Ok((producer, Ok(buf))) => {
                if producer.remaining > 0 {
                    self.producer = Some(producer);
                }
                self.ready.push_back(Ok(buf));
            }
            Ok((producer, Err(e))) => {
                debug!("Stream of '{}' failed: {}", producer.entry.path, e);
                self.ready.push_back(Err(e));
            }
            Err(e) => self.ready.push_back(Err(e)),
        }
        true
    }

    fn refill(&mut self) -> bool {
        if self.in_flight.is_some() || self.ready.len() >= self.options.queue_depth {
            return false;
        }
        let Some(producer) = self.producer.take() else {
            return false;
        };
        self.in_flight = Some(schedule(&self.scheduler, producer));
        true
    }
}

impl std::fmt::Debug for RangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RangeStream")
            .field("len", &self.len)
            .field("ready", &self.ready.len())
            .field("in_flight", &self.in_flight.is_some())
            .finish()
    }
}

impl Stream for RangeStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        while this.poll_in_flight(cx) || this.refill() {}

        match this.ready.pop_front() {
            Some(Ok(buf)) => Poll::Ready(Some(Ok(buf))),
            Some(Err(e)) => {
                this.ready.clear();
                this.producer = None;
                this.in_flight = None;
                Poll::Ready(Some(Err(e)))
            }
            None if this.in_flight.is_some() => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}
