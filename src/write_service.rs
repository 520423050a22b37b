//! Stateless-per-(org, bucket) write machinery shared by the asynchronous
//! pipeline and the blocking API: URL assembly, request body framing,
//! retry classification and retry-queue discipline.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::Url;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::options::{Options, Precision};
use crate::point::Point;
use crate::retry::RetryQueue;

/// A set of line-protocol records sent in one request.
#[derive(Clone, Debug)]
pub(crate) struct Batch {
    lines: String,
    retry_interval: u32,
    retries: u32,
}

impl Batch {
    /// Creates a batch of `\n`-terminated lines. `retry_interval` is the
    /// wait in seconds before the next attempt; the server overrides it
    /// through `Retry-After` on a retryable failure.
    pub(crate) fn new(lines: String, retry_interval: u32) -> Self {
        Self {
            lines,
            retry_interval,
            retries: 0,
        }
    }

    pub(crate) fn lines(&self) -> &str {
        &self.lines
    }
}

/// Transport used by the write path.
///
/// Implemented by [`Client`](crate::Client); tests substitute an in-memory
/// double to stand in for a server.
#[async_trait]
pub(crate) trait WriteConnection: Send + Sync {
    /// Client options, shared by every API handed out by the client.
    fn options(&self) -> &Options;

    /// Base URL of the server.
    fn server_url(&self) -> &str;

    /// POSTs one batch body. `content_encoding` is set when the body is
    /// compressed. A non-2xx reply surfaces as [`Error::Server`].
    async fn write_request(
        &self,
        url: &str,
        body: Bytes,
        content_encoding: Option<&'static str>,
    ) -> Result<()>;
}

/// Per-(org, bucket) writer: owns the write URL cache, the last-attempt
/// clock and the retry queue. Driven by exactly one caller at a time, so
/// none of its state is locked.
pub(crate) struct WriteService {
    org: String,
    bucket: String,
    conn: Arc<dyn WriteConnection>,
    url: Option<String>,
    last_attempt: Option<Instant>,
    retry_queue: RetryQueue,
}

impl WriteService {
    pub(crate) fn new(org: &str, bucket: &str, conn: Arc<dyn WriteConnection>) -> Self {
        let options = conn.options();
        let capacity = options
            .retry_buffer_limit
            .checked_div(options.batch_size)
            .unwrap_or(0);
        Self {
            org: org.to_string(),
            bucket: bucket.to_string(),
            retry_queue: RetryQueue::new(capacity),
            url: None,
            last_attempt: None,
            conn,
        }
    }

    /// Writes `batch`, interleaving it with the retry queue.
    ///
    /// When queued batches exist and the head's retry interval has elapsed,
    /// queued batches are drained first (oldest first) and the fresh batch
    /// joins the tail; when the interval has not elapsed the fresh batch is
    /// queued without any network attempt. The first failed attempt ends the
    /// call; a retryable failure re-queues the batch it was writing.
    pub(crate) async fn handle_write(&mut self, batch: Batch) -> Result<()> {
        trace!("writer: received write request");
        let mut fresh = Some(batch);
        let mut retrying = false;
        loop {
            let mut to_write = None;
            if !self.retry_queue.is_empty() {
                if !retrying {
                    let wait = self.retry_queue.first().map_or(0, |b| b.retry_interval);
                    let ready = match self.last_attempt {
                        None => true,
                        Some(at) => Instant::now() >= at + Duration::from_secs(u64::from(wait)),
                    };
                    if ready {
                        trace!("writer: taking batch from retry queue");
                        retrying = true;
                    } else if let Some(b) = fresh.take() {
                        debug!("writer: cannot write yet, storing batch to queue");
                        if self.retry_queue.push(b) {
                            warn!("retry buffer full, discarding oldest batch");
                        }
                    }
                }
                if retrying {
                    if let Some(mut head) = self.retry_queue.pop() {
                        head.retries += 1;
                        if let Some(b) = fresh.take() {
                            if self.retry_queue.push(b) {
                                warn!("retry buffer full, discarding oldest batch");
                            }
                        }
                        to_write = Some(head);
                    }
                }
            } else {
                to_write = fresh.take();
            }
            match to_write {
                Some(b) => self.write_batch(b).await?,
                None => break,
            }
        }
        Ok(())
    }

    /// One POST of one batch. On 429/503 the batch is re-queued with the
    /// server-provided or configured retry interval, unless its retry count
    /// is exhausted. Other failures drop the batch.
    async fn write_batch(&mut self, mut batch: Batch) -> Result<()> {
        let url = self.write_url()?;
        let options = self.conn.options();
        let use_gzip = options.use_gzip;
        let retry_interval = options.retry_interval;
        let max_retries = options.max_retries;

        trace!(bytes = batch.lines.len(), "writing batch");
        let (body, content_encoding) = if use_gzip {
            (compress_gzip(batch.lines.as_bytes())?, Some("gzip"))
        } else {
            (Bytes::copy_from_slice(batch.lines.as_bytes()), None)
        };

        self.last_attempt = Some(Instant::now());
        match self.conn.write_request(&url, body, content_encoding).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_retriable() {
                    error!(error = %err, "write failed, batch kept for retrying");
                    batch.retry_interval = match err.retry_after() {
                        Some(after) if after > 0 => after,
                        _ => retry_interval,
                    };
                    if batch.retries < max_retries {
                        if self.retry_queue.push(batch) {
                            warn!("retry buffer full, discarding oldest batch");
                        }
                    }
                } else {
                    error!(error = %err, "write failed");
                }
                Err(err)
            }
        }
    }

    /// Write endpoint with org, bucket and precision parameters. Computed
    /// once and cached.
    fn write_url(&mut self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let mut url = Url::parse(self.conn.server_url())
            .map_err(|e| Error::Parse(format!("invalid server URL: {}", e)))?;
        let path = format!("{}/api/v2/write", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .append_pair("org", &self.org)
            .append_pair("bucket", &self.bucket)
            .append_pair("precision", self.conn.options().precision.as_str());
        let url = url.as_str().to_string();
        self.url = Some(url.clone());
        Ok(url)
    }

    pub(crate) fn options(&self) -> &Options {
        self.conn.options()
    }

    #[cfg(test)]
    pub(crate) fn retry_queue(&mut self) -> &mut RetryQueue {
        &mut self.retry_queue
    }
}

/// Serializes points into a single line-protocol payload.
pub(crate) fn encode_points<'a, I>(points: I, precision: Precision) -> String
where
    I: IntoIterator<Item = &'a Point>,
{
    let mut buffer = String::with_capacity(1024);
    for point in points {
        point.write_line_protocol(&mut buffer, precision);
    }
    buffer
}

/// Gzip-compresses a write body at the level the server recommends.
fn compress_gzip(data: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 3 + 16),
        Compression::new(6),
    );
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::io::Read;
    use std::sync::Mutex;

    use super::*;

    pub(crate) struct MockRequest {
        pub(crate) url: String,
        pub(crate) body: Vec<u8>,
        pub(crate) content_encoding: Option<String>,
    }

    impl MockRequest {
        /// Body as decoded line-protocol lines, gunzipping when the request
        /// was compressed.
        pub(crate) fn decoded_lines(&self) -> Vec<String> {
            let text = if self.content_encoding.as_deref() == Some("gzip") {
                let mut decoder = flate2::read::GzDecoder::new(&self.body[..]);
                let mut out = String::new();
                decoder.read_to_string(&mut out).unwrap();
                out
            } else {
                String::from_utf8(self.body.clone()).unwrap()
            };
            text.lines().map(str::to_string).collect()
        }
    }

    #[derive(Default)]
    struct MockState {
        requests: Vec<MockRequest>,
        replies: VecDeque<Error>,
    }

    /// In-memory stand-in for the server, recording every request and
    /// replying with scripted errors.
    pub(crate) struct MockConnection {
        options: Options,
        state: Mutex<MockState>,
    }

    impl MockConnection {
        pub(crate) fn new(options: Options) -> Self {
            Self {
                options,
                state: Mutex::new(MockState::default()),
            }
        }

        pub(crate) fn reply_with(&self, err: Error) {
            self.state.lock().unwrap().replies.push_back(err);
        }

        pub(crate) fn request_count(&self) -> usize {
            self.state.lock().unwrap().requests.len()
        }

        pub(crate) fn request_urls(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.requests.iter().map(|r| r.url.clone()).collect()
        }

        /// All successfully received lines, in arrival order. Requests
        /// answered with a scripted error are not counted.
        pub(crate) fn lines(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.requests.iter().flat_map(|r| r.decoded_lines()).collect()
        }

        pub(crate) fn last_request_encoding(&self) -> Option<String> {
            let state = self.state.lock().unwrap();
            state.requests.last().and_then(|r| r.content_encoding.clone())
        }
    }

    #[async_trait]
    impl WriteConnection for MockConnection {
        fn options(&self) -> &Options {
            &self.options
        }

        fn server_url(&self) -> &str {
            "http://localhost:8086"
        }

        async fn write_request(
            &self,
            url: &str,
            body: Bytes,
            content_encoding: Option<&'static str>,
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.replies.pop_front() {
                return Err(err);
            }
            state.requests.push(MockRequest {
                url: url.to_string(),
                body: body.to_vec(),
                content_encoding: content_encoding.map(str::to_string),
            });
            Ok(())
        }
    }

    pub(crate) fn server_error(status: u16, retry_after: Option<u32>) -> Error {
        Error::Server {
            status,
            code: "error".to_string(),
            message: "scripted failure".to_string(),
            retry_after,
        }
    }

    fn service(conn: &Arc<MockConnection>) -> WriteService {
        WriteService::new("my-org", "my-bucket", Arc::clone(conn) as Arc<dyn WriteConnection>)
    }

    fn batch(id: usize) -> Batch {
        Batch::new(format!("test value={}i\n", id), 30)
    }

    #[tokio::test]
    async fn test_write_url_composition() {
        let conn = Arc::new(MockConnection::new(Options::default()));
        let mut service = service(&conn);

        service.handle_write(batch(1)).await.unwrap();
        service.handle_write(batch(2)).await.unwrap();

        let urls = conn.request_urls();
        assert_eq!(urls.len(), 2);
        for url in urls {
            assert_eq!(
                url,
                "http://localhost:8086/api/v2/write?org=my-org&bucket=my-bucket&precision=ns"
            );
        }
    }

    #[tokio::test]
    async fn test_precision_in_url() {
        let options = Options::default().precision(Precision::Ms);
        let conn = Arc::new(MockConnection::new(options));
        let mut service = service(&conn);

        service.handle_write(batch(1)).await.unwrap();
        assert!(conn.request_urls()[0].ends_with("precision=ms"));
    }

    #[tokio::test]
    async fn test_gzip_body() {
        let options = Options::default().use_gzip(true);
        let conn = Arc::new(MockConnection::new(options));
        let mut service = service(&conn);

        service.handle_write(batch(7)).await.unwrap();
        assert_eq!(conn.last_request_encoding().as_deref(), Some("gzip"));
        assert_eq!(conn.lines(), vec!["test value=7i"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retriable_error_queues_batch() {
        let conn = Arc::new(MockConnection::new(Options::default()));
        let mut service = service(&conn);

        conn.reply_with(server_error(429, Some(5)));
        let err = service.handle_write(batch(1)).await.unwrap_err();
        assert!(err.is_retriable());

        let queued = service.retry_queue().pop().unwrap();
        assert_eq!(queued.lines(), "test value=1i\n");
        assert_eq!(queued.retry_interval, 5);
        assert_eq!(queued.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_retry_after_uses_configured_interval() {
        let options = Options::default().retry_interval(42);
        let conn = Arc::new(MockConnection::new(options));
        let mut service = service(&conn);

        conn.reply_with(server_error(503, Some(0)));
        service.handle_write(batch(1)).await.unwrap_err();

        let queued = service.retry_queue().pop().unwrap();
        assert_eq!(queued.retry_interval, 42);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_queued() {
        let conn = Arc::new(MockConnection::new(Options::default()));
        let mut service = service(&conn);

        conn.reply_with(server_error(400, None));
        let err = service.handle_write(batch(1)).await.unwrap_err();
        assert!(!err.is_retriable());
        assert!(service.retry_queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_wait_holds_fresh_batches() {
        let options = Options::default().retry_interval(10000);
        let conn = Arc::new(MockConnection::new(options));
        let mut service = service(&conn);

        conn.reply_with(server_error(429, Some(5)));
        service.handle_write(batch(1)).await.unwrap_err();
        assert_eq!(conn.request_count(), 0);

        // Interval not elapsed: fresh batch parks in the queue, no request.
        service.handle_write(batch(2)).await.unwrap();
        assert_eq!(conn.request_count(), 0);

        tokio::time::advance(Duration::from_millis(5050)).await;

        // Queued batches drain first, the fresh one follows.
        service.handle_write(batch(3)).await.unwrap();
        assert_eq!(
            conn.lines(),
            vec!["test value=1i", "test value=2i", "test value=3i"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_exhausts_batch() {
        let options = Options::default().max_retries(1).retry_interval(1);
        let conn = Arc::new(MockConnection::new(options));
        let mut service = service(&conn);

        conn.reply_with(server_error(429, Some(1)));
        service.handle_write(batch(1)).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(1100)).await;

        // The retried batch fails again; its retry count is exhausted and it
        // is dropped, while the fresh batch stays queued for later.
        conn.reply_with(server_error(429, Some(1)));
        service.handle_write(batch(2)).await.unwrap_err();

        let remaining = service.retry_queue().pop().unwrap();
        assert_eq!(remaining.lines(), "test value=2i\n");
        assert!(service.retry_queue().is_empty());
    }

    #[tokio::test]
    async fn test_encode_points() {
        use chrono::TimeZone;

        let mut a = Point::new("test");
        a.add_tag("id", "10");
        a.add_field("float64", 80.1234567);
        a.set_time(chrono::Utc.timestamp_opt(60, 89).unwrap());

        let mut b = Point::new("test");
        b.add_field("value", 3i64);

        let payload = encode_points([&a, &b], Precision::Ns);
        assert_eq!(
            payload,
            "test,id=10 float64=80.1234567 60000000089\ntest value=3i\n"
        );
    }
}
