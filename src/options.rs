//! Client configuration.

/// Timestamp precision used both when serializing points and as the
/// `precision` query parameter of write requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precision {
    /// Nanoseconds (server default).
    #[default]
    Ns,
    /// Microseconds.
    Us,
    /// Milliseconds.
    Ms,
    /// Seconds.
    S,
}

impl Precision {
    /// Wire representation used in the write URL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Ns => "ns",
            Precision::Us => "us",
            Precision::Ms => "ms",
            Precision::S => "s",
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for communicating with an InfluxDB server.
///
/// Log verbosity is not configured here; the crate emits `tracing` events and
/// the embedding application filters them through its subscriber.
///
/// # Example
///
/// ```ignore
/// use influxdb2_client::{Client, Options, Precision};
///
/// let options = Options::default()
///     .batch_size(1000)
///     .precision(Precision::Ms)
///     .use_gzip(true);
/// let client = Client::with_options("http://localhost:8086", "my-token", options);
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    pub(crate) batch_size: usize,
    pub(crate) flush_interval: u64,
    pub(crate) retry_interval: u32,
    pub(crate) max_retries: u32,
    pub(crate) retry_buffer_limit: usize,
    pub(crate) precision: Precision,
    pub(crate) use_gzip: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            flush_interval: 1000,
            retry_interval: 30,
            max_retries: 3,
            retry_buffer_limit: 10000,
            precision: Precision::Ns,
            use_gzip: false,
        }
    }
}

impl Options {
    /// Maximum number of records sent to the server in a single request.
    /// Default 5000.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Interval, in milliseconds, in which the buffer is flushed if it has
    /// not already been written by reaching the batch size. Default 1000 ms.
    pub fn flush_interval(mut self, millis: u64) -> Self {
        self.flush_interval = millis;
        self
    }

    /// Default wait, in seconds, before retrying a failed batch when the
    /// server does not send `Retry-After`. Default 30 s.
    pub fn retry_interval(mut self, secs: u32) -> Self {
        self.retry_interval = secs;
        self
    }

    /// Maximum count of retry attempts of a failed batch. The initial
    /// attempt is not counted. Default 3.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Maximum number of records retained across batches queued for retry.
    /// Should be a multiple of the batch size. Default 10000.
    pub fn retry_buffer_limit(mut self, limit: usize) -> Self {
        self.retry_buffer_limit = limit;
        self
    }

    /// Timestamp precision for writes. Default nanoseconds.
    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Whether to gzip-compress write request bodies. Default false.
    pub fn use_gzip(mut self, use_gzip: bool) -> Self {
        self.use_gzip = use_gzip;
        self
    }
}
