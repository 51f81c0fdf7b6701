use std::time::Duration;
use tokio::time::Instant;

use super::DeliveryHandle;
use crate::config::ShipperConfig;
use crate::models::LogEntry;

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Interval => "interval",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_messages: usize,
    pub max_interval: Duration,
}

impl FlushPolicy {
    pub fn new(max_messages: usize, max_interval: Duration) -> Self {
        Self {
            max_messages: max_messages.max(1),
            max_interval,
        }
    }

    /// `buffered` messages held, `since_flush` elapsed since the last flush
    pub fn should_flush(&self, buffered: usize, since_flush: Duration) -> Option<FlushTrigger> {
        if buffered == 0 {
            None
        } else if buffered >= self.max_messages {
            Some(FlushTrigger::Size)
        } else if since_flush >= self.max_interval {
            Some(FlushTrigger::Interval)
        } else {
            None
        }
    }

    /// Broker prefetch: never hold more unacknowledged messages than one batch
    pub fn prefetch(&self) -> u16 {
        u16::try_from(self.max_messages).unwrap_or(u16::MAX)
    }

    /// How often an idle buffer is re-checked against the interval
    pub fn tick_period(&self) -> Duration {
        self.max_interval
            .min(Duration::from_secs(1))
            .max(Duration::from_millis(10))
    }
}

impl From<&ShipperConfig> for FlushPolicy {
    fn from(config: &ShipperConfig) -> Self {
        Self::new(config.batch_size as usize, config.flush_interval())
    }
}

/// Received, not yet settled messages in arrival order
pub struct LogBatch {
    messages: Vec<Vec<LogEntry>>,
    handles: Vec<Box<dyn DeliveryHandle>>,
    last_flush: Instant,
}

impl Default for LogBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBatch {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            handles: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    pub fn push(&mut self, entries: Vec<LogEntry>, handle: Box<dyn DeliveryHandle>) {
        self.messages.push(entries);
        self.handles.push(handle);
    }

    /// Number of messages held
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.messages.iter().map(Vec::len).sum()
    }

    pub fn messages(&self) -> impl Iterator<Item = &[LogEntry]> {
        self.messages.iter().map(Vec::as_slice)
    }

    pub fn handles(&self) -> &[Box<dyn DeliveryHandle>] {
        &self.handles
    }

    pub fn since_flush(&self) -> Duration {
        self.last_flush.elapsed()
    }

    /// Drop everything and restart the interval
    pub fn clear(&mut self) {
        self.messages.clear();
        self.handles.clear();
        self.last_flush = Instant::now();
    }
}
