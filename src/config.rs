use std::time::Duration;

/// Configuration of an [`EventBus`](crate::EventBus).
///
/// Supplied once to [`EventBus::new`](crate::EventBus::new) and immutable for
/// the bus's lifetime. Use the builder methods to customize, or [`Default`]
/// for the documented defaults.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use herald::Config;
///
/// let config = Config::default()
///     .with_max_concurrent_handlers(4)                  // Tighter gate
///     .with_handler_timeout(Duration::from_secs(5))     // Fail slow handlers sooner
///     .with_batch_size(1);                              // No batch replay
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Record publish/handle/error counters.
    /// Default: true
    pub enable_metrics: bool,

    /// Failed retries after which a dead-lettered event is dropped.
    /// Default: 3
    pub max_retries: u32,

    /// Base of the exponential retry backoff: an entry with `n` failed retries
    /// becomes due `retry_delay * 2^n` after its last failure.
    /// Default: 1 s
    pub retry_delay: Duration,

    /// Handler executions allowed in flight at once, bus-wide.
    /// Values below 1 are treated as 1.
    /// Default: 10
    pub max_concurrent_handlers: usize,

    /// Time a handler may run before it counts as failed, unless its
    /// subscription overrides it.
    /// Default: 30 s
    pub handler_timeout: Duration,

    /// Capture failed deliveries for later retry.
    /// Default: true
    pub enable_dead_letter_queue: bool,

    /// Dead-letter entries kept before the oldest is evicted.
    /// Default: 1000
    pub dead_letter_queue_size: usize,

    /// Trailing window of history re-dispatched on every batch cycle. The
    /// batch replayer only runs when this is greater than 1.
    /// Default: 100
    pub batch_size: usize,

    /// Interval between batch cycles.
    /// Default: 1 s
    pub batch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enable_metrics: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            max_concurrent_handlers: 10,
            handler_timeout: Duration::from_millis(30_000),
            enable_dead_letter_queue: true,
            dead_letter_queue_size: 1000,
            batch_size: 100,
            batch_timeout: Duration::from_millis(1000),
        }
    }
}

impl Config {
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the size of the concurrency gate.
    ///
    /// Handlers beyond this limit wait in arrival order for a free slot.
    pub fn with_max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_dead_letter_queue(mut self, enabled: bool) -> Self {
        self.enable_dead_letter_queue = enabled;
        self
    }

    pub fn with_dead_letter_queue_size(mut self, size: usize) -> Self {
        self.dead_letter_queue_size = size;
        self
    }

    /// Set the batch replay window. `1` or `0` disables the batch replayer.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_timeout(mut self, interval: Duration) -> Self {
        self.batch_timeout = interval;
        self
    }

    pub(crate) fn gate_size(&self) -> usize {
        self.max_concurrent_handlers.max(1)
    }

    pub(crate) fn batch_replay_enabled(&self) -> bool {
        self.batch_size > 1 && !self.batch_timeout.is_zero()
    }
}
