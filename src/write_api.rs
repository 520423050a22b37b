//! Asynchronous, buffering write pipeline.
//!
//! Producers append records to a buffer worker over a channel; the buffer
//! worker flushes size- or time-bounded batches to a writer worker, which
//! drives the write service and with it the retry queue. Flush and close are
//! commands travelling the same FIFO channels as the data, so their
//! acknowledgements imply everything submitted earlier has been attempted.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::options::{Options, Precision};
use crate::point::Point;
use crate::write_service::{Batch, WriteConnection, WriteService};

/// Capacity of the user-visible error channel. Errors beyond this are
/// dropped rather than blocking the writer.
const ERROR_CHANNEL_CAPACITY: usize = 64;

enum BufferMessage {
    Line(String),
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

enum WriterMessage {
    Write(Batch),
    Check(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Non-blocking write client that batches records in the background.
///
/// Records and points enqueued by a single producer reach the server in
/// submission order. Dropping the pipeline without [`close`](WriteApi::close)
/// still flushes the buffered records, but detached; call `close` to wait
/// for delivery attempts to finish.
///
/// # Example
///
/// ```ignore
/// use influxdb2_client::{Client, Point};
///
/// let client = Client::new("http://localhost:8086", "my-token");
/// let mut write_api = client.write_api("my-org", "my-bucket");
///
/// let mut point = Point::new("temperature");
/// point.add_tag("room", "kitchen").add_field("value", 21.5);
/// write_api.write_point(&point).await?;
/// write_api.close().await;
/// ```
pub struct WriteApi {
    tx: Option<mpsc::Sender<BufferMessage>>,
    err_rx: Option<mpsc::Receiver<Error>>,
    buffer_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
    precision: Precision,
}

impl WriteApi {
    pub(crate) fn new(org: &str, bucket: &str, conn: Arc<dyn WriteConnection>) -> Self {
        let options = conn.options().clone();
        let precision = options.precision;
        let service = WriteService::new(org, bucket, conn);

        let (tx, rx) = mpsc::channel(1);
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (err_tx, err_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let buffer_handle = tokio::spawn(buffer_worker(rx, batch_tx, options));
        let writer_handle = tokio::spawn(writer_worker(batch_rx, service, err_tx));

        Self {
            tx: Some(tx),
            err_rx: Some(err_rx),
            buffer_handle: Some(buffer_handle),
            writer_handle: Some(writer_handle),
            precision,
        }
    }

    /// Appends one line-protocol record to the buffer. The terminating `\n`
    /// is added here.
    pub async fn write_record(&self, line: impl Into<String>) -> Result<()> {
        let mut line = line.into();
        line.push('\n');
        self.send(BufferMessage::Line(line)).await
    }

    /// Serializes one point and appends it to the buffer.
    pub async fn write_point(&self, point: &Point) -> Result<()> {
        self.send(BufferMessage::Line(point.to_line_protocol(self.precision)))
            .await
    }

    /// Forces all buffered records out and waits until the writer has
    /// attempted every batch submitted before this call.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(BufferMessage::Flush(ack_tx)).await?;
        ack_rx.await.map_err(|_| Error::Closed)
    }

    /// Channel carrying errors from background writes.
    ///
    /// The channel is bounded; when it is full or nobody reads it, further
    /// errors are dropped. The receiver is handed out once.
    pub fn errors(&mut self) -> Option<mpsc::Receiver<Error>> {
        self.err_rx.take()
    }

    /// Flushes pending records and stops both workers. After closing, write
    /// calls fail with [`Error::Closed`].
    pub async fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(BufferMessage::Stop(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
        }
        if let Some(handle) = self.buffer_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.await;
        }
    }

    async fn send(&self, msg: BufferMessage) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(msg).await.map_err(|_| Error::Closed),
            None => Err(Error::Closed),
        }
    }
}

/// Accumulates records and flushes them as batches when the batch size is
/// reached, the flush interval elapses, or a flush/stop command arrives.
async fn buffer_worker(
    mut rx: mpsc::Receiver<BufferMessage>,
    batch_tx: mpsc::Sender<WriterMessage>,
    options: Options,
) {
    debug!("buffer worker started");
    let period = std::time::Duration::from_millis(options.flush_interval.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buffer: Vec<String> = Vec::with_capacity(options.batch_size + 1);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(BufferMessage::Line(line)) => {
                    buffer.push(line);
                    if buffer.len() >= options.batch_size {
                        flush_buffer(&mut buffer, &batch_tx, &options).await;
                    }
                }
                Some(BufferMessage::Flush(ack)) => {
                    flush_buffer(&mut buffer, &batch_tx, &options).await;
                    // The ack rides behind the flushed batch; the writer
                    // fires it once everything before it was attempted.
                    let _ = batch_tx.send(WriterMessage::Check(ack)).await;
                }
                Some(BufferMessage::Stop(ack)) => {
                    flush_buffer(&mut buffer, &batch_tx, &options).await;
                    let (done_tx, done_rx) = oneshot::channel();
                    if batch_tx.send(WriterMessage::Stop(done_tx)).await.is_ok() {
                        let _ = done_rx.await;
                    }
                    let _ = ack.send(());
                    break;
                }
                None => {
                    // Pipeline dropped without close: final flush, then let
                    // the writer drain by closing the batch channel.
                    flush_buffer(&mut buffer, &batch_tx, &options).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush_buffer(&mut buffer, &batch_tx, &options).await;
            }
        }
    }
    debug!("buffer worker finished");
}

async fn flush_buffer(
    buffer: &mut Vec<String>,
    batch_tx: &mpsc::Sender<WriterMessage>,
    options: &Options,
) {
    if buffer.is_empty() {
        return;
    }
    debug!(lines = buffer.len(), "sending batch");
    let batch = Batch::new(buffer.concat(), options.retry_interval);
    buffer.clear();
    if batch_tx.send(WriterMessage::Write(batch)).await.is_err() {
        warn!("writer worker is gone, dropping batch");
    }
}

/// Drives the write service batch by batch, forwarding failures to the
/// error channel without ever blocking on it.
async fn writer_worker(
    mut rx: mpsc::Receiver<WriterMessage>,
    mut service: WriteService,
    err_tx: mpsc::Sender<Error>,
) {
    debug!("writer worker started");
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMessage::Write(batch) => {
                if let Err(err) = service.handle_write(batch).await {
                    error!(error = %err, "async write failed");
                    if err_tx.try_send(err).is_err() {
                        debug!("error channel full or unread, dropping error");
                    }
                }
            }
            WriterMessage::Check(ack) => {
                let _ = ack.send(());
            }
            WriterMessage::Stop(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
    debug!("writer worker finished");
}
