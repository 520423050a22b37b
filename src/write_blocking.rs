//! Blocking write client without background buffering.

use std::sync::Arc;

use crate::error::Result;
use crate::options::Precision;
use crate::point::Point;
use crate::write_service::{encode_points, Batch, WriteConnection, WriteService};

/// Write client that performs one request per call and returns its outcome.
///
/// There is no buffering and no background worker; each call makes a single
/// pass through the write service, which still honors the retry queue when a
/// prior call on this client left batches in it. For deadlines, wrap calls
/// in [`tokio::time::timeout`].
///
/// # Example
///
/// ```ignore
/// use influxdb2_client::{Client, Point};
///
/// let client = Client::new("http://localhost:8086", "my-token");
/// let mut write_api = client.write_api_blocking("my-org", "my-bucket");
///
/// let mut point = Point::new("temperature");
/// point.add_field("value", 21.5);
/// write_api.write_points(&[point]).await?;
/// ```
pub struct WriteApiBlocking {
    service: WriteService,
    precision: Precision,
}

impl WriteApiBlocking {
    pub(crate) fn new(org: &str, bucket: &str, conn: Arc<dyn WriteConnection>) -> Self {
        let precision = conn.options().precision;
        Self {
            service: WriteService::new(org, bucket, conn),
            precision,
        }
    }

    /// Writes line-protocol records as one batch. Each record is terminated
    /// with `\n`; an empty iterator is a no-op.
    pub async fn write_records<I>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut payload = String::new();
        for line in lines {
            payload.push_str(line.as_ref());
            payload.push('\n');
        }
        self.write(payload).await
    }

    /// Writes a single line-protocol record.
    pub async fn write_record(&mut self, line: impl AsRef<str>) -> Result<()> {
        self.write_records([line]).await
    }

    /// Encodes points in one pass and writes them as one batch. An empty
    /// slice is a no-op.
    pub async fn write_points(&mut self, points: &[Point]) -> Result<()> {
        self.write(encode_points(points, self.precision)).await
    }

    /// Encodes and writes a single point.
    pub async fn write_point(&mut self, point: &Point) -> Result<()> {
        self.write(encode_points([point], self.precision)).await
    }

    async fn write(&mut self, payload: String) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        let retry_interval = self.service.options().retry_interval;
        self.service
            .handle_write(Batch::new(payload, retry_interval))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::options::Options;
    use crate::write_service::tests::{server_error, MockConnection};

    fn blocking_api(conn: &Arc<MockConnection>) -> WriteApiBlocking {
        WriteApiBlocking::new(
            "my-org",
            "my-bucket",
            Arc::clone(conn) as Arc<dyn WriteConnection>,
        )
    }

    #[tokio::test]
    async fn test_write_records_joins_lines() {
        let conn = Arc::new(MockConnection::new(Options::default()));
        let mut api = blocking_api(&conn);

        api.write_records(["test value=1i", "test value=2i", "test value=3i"])
            .await
            .unwrap();

        assert_eq!(conn.request_count(), 1);
        assert_eq!(
            conn.lines(),
            vec!["test value=1i", "test value=2i", "test value=3i"]
        );
    }

    #[tokio::test]
    async fn test_empty_input_is_a_no_op() {
        let conn = Arc::new(MockConnection::new(Options::default()));
        let mut api = blocking_api(&conn);

        api.write_records(Vec::<String>::new()).await.unwrap();
        api.write_points(&[]).await.unwrap();
        assert_eq!(conn.request_count(), 0);
    }

    #[tokio::test]
    async fn test_write_points_single_batch() {
        let conn = Arc::new(MockConnection::new(Options::default()));
        let mut api = blocking_api(&conn);

        let mut a = Point::new("test");
        a.add_tag("id", "10");
        a.add_field("float64", 80.1234567);
        a.set_time(chrono::Utc.timestamp_opt(60, 89).unwrap());
        let mut b = Point::new("test");
        b.add_field("value", 5i64);

        api.write_points(&[a, b]).await.unwrap();

        assert_eq!(conn.request_count(), 1);
        assert_eq!(
            conn.lines(),
            vec!["test,id=10 float64=80.1234567 60000000089", "test value=5i"]
        );
    }

    #[tokio::test]
    async fn test_error_is_returned_directly() {
        let conn = Arc::new(MockConnection::new(Options::default()));
        let mut api = blocking_api(&conn);

        conn.reply_with(server_error(400, None));
        let err = api.write_record("test value=1i").await.unwrap_err();
        assert!(!err.is_retriable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_call_replays_retry_queue() {
        let options = Options::default().retry_interval(1);
        let conn = Arc::new(MockConnection::new(options));
        let mut api = blocking_api(&conn);

        conn.reply_with(server_error(503, Some(1)));
        api.write_record("test value=1i").await.unwrap_err();
        assert_eq!(conn.lines().len(), 0);

        tokio::time::advance(std::time::Duration::from_millis(1100)).await;

        api.write_record("test value=2i").await.unwrap();
        assert_eq!(conn.lines(), vec!["test value=1i", "test value=2i"]);
    }
}
