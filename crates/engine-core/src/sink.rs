use crate::error::SinkError;
use model::messages::Message;
use std::{
    io::{self, BufWriter, Write},
    sync::{Arc, Mutex},
};

/// Destination for tap output.
///
/// Writes are synchronous so a pending state can still be flushed from a
/// destructor.
pub trait MessageSink: Send {
    fn write(&mut self, message: &Message) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError>;
}

/// Newline-delimited JSON over any writer.
pub struct WriterSink<W: Write + Send> {
    out: BufWriter<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(out: W) -> Self {
        WriterSink {
            out: BufWriter::new(out),
        }
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        WriterSink::new(io::stdout())
    }
}

impl<W: Write + Send> MessageSink for WriterSink<W> {
    fn write(&mut self, message: &Message) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        // State lines are checkpoints; they must not sit in the buffer.
        if matches!(message, Message::State { .. }) {
            self.out.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Collects messages in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl MessageSink for MemorySink {
    fn write(&mut self, message: &Message) -> Result<(), SinkError> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
