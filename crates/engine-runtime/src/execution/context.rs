use engine_core::{error::SinkError, metrics::Metrics, sink::MessageSink, state::TapState};
use model::{core::stream::StreamId, messages::Message, records::record::Record};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Everything one sync run mutates: the tap state and the output channel.
///
/// State is written out on a timer, at explicit boundaries, and once more
/// when the context is dropped with unflushed changes, so every exit path
/// leaves the last checkpoint on the output.
pub struct SyncContext {
    state: TapState,
    sink: Box<dyn MessageSink>,
    metrics: Metrics,
    flush_interval: Duration,
    last_flush: Instant,
    dirty: bool,
}

impl SyncContext {
    pub fn new(
        state: TapState,
        sink: Box<dyn MessageSink>,
        metrics: Metrics,
        flush_interval: Duration,
    ) -> Self {
        SyncContext {
            state,
            sink,
            metrics,
            flush_interval,
            last_flush: Instant::now(),
            dirty: false,
        }
    }

    pub fn state(&self) -> &TapState {
        &self.state
    }

    /// Mutable state access; marks the state as needing a flush.
    pub fn state_mut(&mut self) -> &mut TapState {
        self.dirty = true;
        &mut self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn emit_schema(&mut self, stream: StreamId, schema: Value) -> Result<(), SinkError> {
        self.sink.write(&Message::schema(stream, schema))
    }

    pub fn emit_record(
        &mut self,
        stream: StreamId,
        record: Record,
        version: u64,
    ) -> Result<(), SinkError> {
        self.sink
            .write(&Message::record(stream, record.into_value(), version))?;
        self.metrics.increment_records(1);
        Ok(())
    }

    /// Flushes state if the flush interval has elapsed.
    pub fn checkpoint(&mut self) -> Result<(), SinkError> {
        if self.dirty && self.last_flush.elapsed() >= self.flush_interval {
            self.flush_state()?;
        }
        Ok(())
    }

    /// Writes the current state as a STATE message.
    pub fn flush_state(&mut self) -> Result<(), SinkError> {
        self.sink.write(&Message::state(self.state.to_value()))?;
        self.sink.flush()?;
        self.metrics.increment_flushes(1);
        self.last_flush = Instant::now();
        self.dirty = false;
        debug!("State flushed");
        Ok(())
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        if self.dirty
            && let Err(err) = self.flush_state()
        {
            error!("Failed to flush state on exit: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::sink::MemorySink;
    use serde_json::json;

    fn context(sink: &MemorySink, interval: Duration) -> SyncContext {
        SyncContext::new(
            TapState::default(),
            Box::new(sink.clone()),
            Metrics::new(),
            interval,
        )
    }

    fn state_lines(sink: &MemorySink) -> usize {
        sink.messages()
            .iter()
            .filter(|m| matches!(m, Message::State { .. }))
            .count()
    }

    #[test]
    fn drop_flushes_pending_state() {
        let sink = MemorySink::new();
        {
            let mut ctx = context(&sink, Duration::from_secs(3600));
            ctx.state_mut().record_id(StreamId::Lists, "a1");
        }
        assert_eq!(state_lines(&sink), 1);
        let last = sink.messages().pop().unwrap();
        assert_eq!(
            last,
            Message::state(json!({"bookmarks": {"lists": {"ids": ["a1"]}}}))
        );
    }

    #[test]
    fn clean_context_does_not_flush_on_drop() {
        let sink = MemorySink::new();
        {
            let mut ctx = context(&sink, Duration::from_secs(3600));
            ctx.state_mut();
            ctx.flush_state().unwrap();
        }
        assert_eq!(state_lines(&sink), 1);
    }

    #[test]
    fn checkpoint_respects_interval() {
        let sink = MemorySink::new();
        let mut ctx = context(&sink, Duration::from_secs(3600));
        ctx.state_mut().record_id(StreamId::Lists, "a1");
        ctx.checkpoint().unwrap();
        assert_eq!(state_lines(&sink), 0);

        let mut eager = context(&sink, Duration::ZERO);
        eager.state_mut().record_id(StreamId::Lists, "a1");
        eager.checkpoint().unwrap();
        assert_eq!(state_lines(&sink), 1);
        drop(eager);
        drop(ctx);
        assert_eq!(state_lines(&sink), 2);
    }
}
