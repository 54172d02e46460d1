//! Output token sinks.
//!
//! A sink receives operator tokens in stream order. [`SinkSet`] groups the
//! sinks of one page pass: index 0 is the primary sink, the rest are extra
//! streams fanned out to by a rewriter.

use std::io::{self, Write};

use lopdf::content::{Content, Operation};
use tracing::{trace, warn};

use crate::error::SinkError;
use crate::logging::PDF_REWRITE;

pub trait TokenSink {
    fn write_operation(&mut self, op: &Operation) -> Result<(), SinkError>;

    /// Flushes and closes the sink. Calling it again is a no-op.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<T: TokenSink + ?Sized> TokenSink for &mut T {
    fn write_operation(&mut self, op: &Operation) -> Result<(), SinkError> {
        (**self).write_operation(op)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}

impl<T: TokenSink + ?Sized> TokenSink for Box<T> {
    fn write_operation(&mut self, op: &Operation) -> Result<(), SinkError> {
        (**self).write_operation(op)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}

/// Collects tokens in memory.
#[derive(Debug, Default, Clone)]
pub struct OperationBuffer {
    operations: Vec<Operation>,
}

impl OperationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn into_content(self) -> Content {
        Content {
            operations: self.operations,
        }
    }

    /// Content stream bytes of the buffered tokens.
    pub fn encode(&self) -> Result<Vec<u8>, SinkError> {
        encode_operations(&self.operations)
    }
}

impl TokenSink for OperationBuffer {
    fn write_operation(&mut self, op: &Operation) -> Result<(), SinkError> {
        self.operations.push(op.clone());
        Ok(())
    }
}

pub fn encode_operations(operations: &[Operation]) -> Result<Vec<u8>, SinkError> {
    let content = Content {
        operations: operations.to_vec(),
    };
    Ok(content.encode()?)
}

/// Serializes each token to `W` as soon as it is written.
///
/// Flushed by [`TokenSink::finish`]; dropped unfinished writers flush
/// themselves and log any failure.
pub struct StreamWriter<W: Write> {
    writer: Option<W>,
    written: usize,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        StreamWriter {
            writer: Some(writer),
            written: 0,
        }
    }

    /// Number of tokens written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn is_finished(&self) -> bool {
        self.writer.is_none()
    }

    /// Finishes the writer and hands back the underlying output.
    pub fn into_inner(mut self) -> Result<W, SinkError> {
        let mut writer = self.writer.take().ok_or_else(finished_error)?;
        writer.flush()?;
        Ok(writer)
    }
}

fn finished_error() -> SinkError {
    SinkError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "stream writer already finished",
    ))
}

impl<W: Write> TokenSink for StreamWriter<W> {
    fn write_operation(&mut self, op: &Operation) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or_else(finished_error)?;
        let bytes = encode_operations(std::slice::from_ref(op))?;
        writer.write_all(&bytes)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        match self.writer.take() {
            Some(mut writer) => Ok(writer.flush()?),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for StreamWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(target: PDF_REWRITE, "failed to flush stream writer on drop: {}", e);
        }
    }
}

struct Slot<'a> {
    sink: Box<dyn TokenSink + 'a>,
    closed: bool,
}

/// The ordered sinks of one page pass. Index 0 is the primary sink.
///
/// Every sink is finished exactly once: by [`SinkSet::finish_all`], or when
/// the set is dropped on an error path.
pub struct SinkSet<'a> {
    slots: Vec<Slot<'a>>,
}

impl<'a> SinkSet<'a> {
    pub fn new(sinks: Vec<Box<dyn TokenSink + 'a>>) -> Self {
        SinkSet {
            slots: sinks
                .into_iter()
                .map(|sink| Slot {
                    sink,
                    closed: false,
                })
                .collect(),
        }
    }

    /// A set over borrowed sinks, primary first.
    pub fn from_sinks<S: TokenSink + 'a>(sinks: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            sinks
                .into_iter()
                .map(|s| Box::new(s) as Box<dyn TokenSink + 'a>)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn write(&mut self, index: usize, op: &Operation) -> Result<(), SinkError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SinkError::NoSuchSink(index))?;
        if slot.closed {
            return Err(SinkError::Closed(index));
        }
        trace!(target: PDF_REWRITE, sink = index, op = %op.operator);
        slot.sink.write_operation(op)
    }

    pub fn write_primary(&mut self, op: &Operation) -> Result<(), SinkError> {
        self.write(0, op)
    }

    /// Writes `op` to every sink, in index order.
    pub fn write_all(&mut self, op: &Operation) -> Result<(), SinkError> {
        for index in 0..self.slots.len() {
            self.write(index, op)?;
        }
        Ok(())
    }

    /// Writes `op` to every sink except the primary.
    pub fn write_extra(&mut self, op: &Operation) -> Result<(), SinkError> {
        for index in 1..self.slots.len() {
            self.write(index, op)?;
        }
        Ok(())
    }

    /// Finishes every open sink, reporting the first failure after trying all.
    pub fn finish_all(&mut self) -> Result<(), SinkError> {
        let mut first_error = None;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.closed {
                continue;
            }
            slot.closed = true;
            if let Err(e) = slot.sink.finish() {
                warn!(target: PDF_REWRITE, sink = index, "failed to finish sink: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SinkSet<'_> {
    fn drop(&mut self) {
        let _ = self.finish_all();
    }
}
