//! Query execution and streaming decoding of annotated CSV responses.
//!
//! The `/api/v2/query` endpoint answers with a concatenation of tables, each
//! introduced by `#datatype`, `#group` and `#default` annotation rows
//! followed by a header row and data rows. [`QueryTableResult`] walks that
//! stream row by row without buffering the response.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::OnceLock;

use async_stream::stream;
use base64::Engine;
use chrono::DateTime;
use csv_async::AsyncReaderBuilder;
use futures::{Stream, StreamExt, TryStreamExt};
use go_parse_duration::parse_duration;
use reqwest::{header, Url};
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::types::{DataType, FluxColumn, FluxRecord, FluxTableMetadata};
use crate::value::Value;

/// Query client for one organization.
///
/// Created by [`Client::query_api`](crate::Client::query_api).
pub struct QueryApi {
    org: String,
    client: Client,
    url: OnceLock<String>,
}

/// Flux query request body.
#[derive(Debug, Serialize)]
struct QueryRequest {
    query: String,
    #[serde(rename = "type")]
    query_type: &'static str,
    dialect: Dialect,
}

/// CSV dialect the decoder expects: all three annotations, comma delimiter,
/// header row present.
#[derive(Debug, Serialize)]
struct Dialect {
    annotations: Vec<&'static str>,
    delimiter: &'static str,
    header: bool,
}

impl QueryRequest {
    fn new(query: String) -> Self {
        Self {
            query,
            query_type: "flux",
            dialect: Dialect {
                annotations: vec!["datatype", "group", "default"],
                delimiter: ",",
                header: true,
            },
        }
    }
}

impl QueryApi {
    pub(crate) fn new(org: &str, client: Client) -> Self {
        Self {
            org: org.to_string(),
            client,
            url: OnceLock::new(),
        }
    }

    /// Executes a Flux query and returns a cursor over the decoded records.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut result = query_api.query(r#"from(bucket: "sensors") |> range(start: -1h)"#).await?;
    /// while result.next().await {
    ///     if result.table_changed() {
    ///         println!("table: {:?}", result.table_metadata());
    ///     }
    ///     println!("record: {:?}", result.record());
    /// }
    /// if let Some(err) = result.err() {
    ///     eprintln!("query failed: {}", err);
    /// }
    /// ```
    pub async fn query(
        &self,
        query: impl Into<String>,
    ) -> Result<QueryTableResult<Box<dyn AsyncRead + Unpin + Send>>> {
        let response = self.post_query(query.into()).await?;
        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        Ok(QueryTableResult::new(Box::new(reader)))
    }

    /// Executes a Flux query and returns records as an async stream, ending
    /// with an `Err` item when decoding stops early.
    pub async fn query_stream(
        &self,
        query: impl Into<String>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<FluxRecord>> + Send>>> {
        let mut result = self.query(query).await?;
        let s = stream! {
            while result.next().await {
                if let Some(record) = result.record() {
                    yield Ok(record.clone());
                }
            }
            if let Some(err) = result.err.take() {
                yield Err(err);
            }
        };
        Ok(Box::pin(s))
    }

    /// Executes a Flux query and returns the complete annotated CSV response
    /// as a string. Prefer [`query`](QueryApi::query) for large results.
    pub async fn query_raw(&self, query: impl Into<String>) -> Result<String> {
        let response = self.post_query(query.into()).await?;
        Ok(response.text().await?)
    }

    async fn post_query(&self, query: String) -> Result<reqwest::Response> {
        let url = self.query_url()?.to_string();
        let body = serde_json::to_vec(&QueryRequest::new(query))?;
        self.client
            .post_request(&url, body.into(), |req| {
                req.header(header::CONTENT_TYPE, "application/json")
            })
            .await
    }

    /// Query endpoint with the org parameter. Computed once and cached.
    fn query_url(&self) -> Result<&str> {
        if let Some(url) = self.url.get() {
            return Ok(url);
        }
        let mut url = Url::parse(self.client.server_url())
            .map_err(|e| Error::Parse(format!("invalid server URL: {}", e)))?;
        let path = format!("{}/api/v2/query", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut().append_pair("org", &self.org);
        Ok(self.url.get_or_init(|| url.as_str().to_string()))
    }
}

/// Parsing mode while consuming an annotation block.
#[derive(Clone, Copy, PartialEq)]
enum ParsingState {
    /// Annotations or data rows.
    Normal,
    /// The column-name header follows the `#default` row.
    NameRow,
    /// The header announced an in-band error table.
    ErrorRow,
}

/// Cursor over the tables of one query response.
///
/// Walk the result by calling [`next`](QueryTableResult::next) until it
/// returns false, then check [`err`](QueryTableResult::err): an early end is
/// reported there. The underlying response stream is dropped with the
/// cursor, or as soon as decoding terminates.
pub struct QueryTableResult<R: AsyncRead + Unpin> {
    csv: csv_async::AsyncReader<R>,
    table_position: i64,
    table: Option<FluxTableMetadata>,
    record: Option<FluxRecord>,
    last_record_table: Option<i64>,
    table_changed: bool,
    finished: bool,
    err: Option<Error>,
}

impl<R: AsyncRead + Unpin + Send> QueryTableResult<R> {
    /// Creates a cursor decoding annotated CSV from `reader`.
    pub fn new(reader: R) -> Self {
        let csv = AsyncReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .create_reader(reader);
        Self {
            csv,
            table_position: 0,
            table: None,
            record: None,
            last_record_table: None,
            table_changed: false,
            finished: false,
            err: None,
        }
    }

    /// Advances to the next record, consuming annotation rows on the way.
    /// Returns false at the end of the stream or on an error; distinguish
    /// the two through [`err`](QueryTableResult::err).
    pub async fn next(&mut self) -> bool {
        if self.finished {
            return false;
        }
        match self.advance().await {
            Ok(Some(record)) => {
                self.table_changed = self.last_record_table != Some(record.table());
                self.last_record_table = Some(record.table());
                self.record = Some(record);
                true
            }
            Ok(None) => {
                self.finished = true;
                self.record = None;
                false
            }
            Err(err) => {
                self.finished = true;
                self.record = None;
                self.err = Some(err);
                false
            }
        }
    }

    /// Last decoded record.
    pub fn record(&self) -> Option<&FluxRecord> {
        self.record.as_ref()
    }

    /// Metadata of the table the cursor is currently in.
    pub fn table_metadata(&self) -> Option<&FluxTableMetadata> {
        self.table.as_ref()
    }

    /// True when the last [`next`](QueryTableResult::next) crossed into a
    /// new table.
    pub fn table_changed(&self) -> bool {
        self.table_changed
    }

    /// Error that ended the stream early, if any.
    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    async fn advance(&mut self) -> Result<Option<FluxRecord>> {
        let mut state = ParsingState::Normal;
        let mut records = self.csv.records();
        loop {
            let row = match records.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(Error::Csv(e.to_string())),
                Some(Ok(row)) => row,
            };

            // Blank separators between tables arrive as short rows.
            if row.len() <= 1 {
                continue;
            }

            match row.get(0).unwrap_or_default() {
                "" => match state {
                    ParsingState::ErrorRow => {
                        let message = match row.get(1) {
                            Some(m) if !m.is_empty() => m.to_string(),
                            _ => "unknown query error".to_string(),
                        };
                        let composed = match row.get(2) {
                            Some(r) if !r.is_empty() => format!("{},{}", message, r),
                            _ => message,
                        };
                        return Err(Error::Query(composed));
                    }
                    ParsingState::NameRow => {
                        if row.get(1) == Some("error") {
                            state = ParsingState::ErrorRow;
                        } else {
                            let table = self
                                .table
                                .as_mut()
                                .ok_or_else(|| Error::Parse("table definition not found".to_string()))?;
                            for (i, name) in row.iter().skip(1).enumerate() {
                                if let Some(column) = table.columns.get_mut(i) {
                                    column.name = name.to_string();
                                }
                            }
                            state = ParsingState::Normal;
                        }
                    }
                    ParsingState::Normal => {
                        let table = self
                            .table
                            .as_ref()
                            .ok_or_else(|| Error::Parse("table definition not found".to_string()))?;
                        if row.len() - 1 != table.columns.len() {
                            return Err(Error::ColumnMismatch {
                                expected: table.columns.len(),
                                actual: row.len() - 1,
                            });
                        }
                        let mut values = BTreeMap::new();
                        for (i, cell) in row.iter().skip(1).enumerate() {
                            let column = &table.columns[i];
                            let raw = if cell.is_empty() {
                                column.default_value.as_str()
                            } else {
                                cell
                            };
                            values.insert(
                                column.name.clone(),
                                parse_value(raw, column.data_type, &column.name)?,
                            );
                        }
                        return Ok(Some(FluxRecord::new(table.position, values)));
                    }
                },
                "#datatype" => {
                    let mut table = FluxTableMetadata::new(self.table_position);
                    self.table_position += 1;
                    for (i, data_type) in row.iter().skip(1).enumerate() {
                        table.columns.push(FluxColumn::new(i, data_type.parse()?));
                    }
                    self.table = Some(table);
                }
                "#group" => {
                    if let Some(table) = self.table.as_mut() {
                        for (i, flag) in row.iter().skip(1).enumerate() {
                            if let Some(column) = table.columns.get_mut(i) {
                                column.group = flag == "true";
                            }
                        }
                    }
                }
                "#default" => {
                    if let Some(table) = self.table.as_mut() {
                        for (i, default) in row.iter().skip(1).enumerate() {
                            if let Some(column) = table.columns.get_mut(i) {
                                column.default_value = default.to_string();
                            }
                        }
                    }
                    // The column-name header follows the defaults.
                    state = ParsingState::NameRow;
                }
                other => {
                    return Err(Error::Parse(format!("unknown annotation: {}", other)));
                }
            }
        }
    }
}

/// Coerces one cell into the column's declared type. Empty cells of
/// non-string columns decode to [`Value::Null`].
fn parse_value(s: &str, data_type: DataType, column_name: &str) -> Result<Value> {
    if s.is_empty() && data_type != DataType::String {
        return Ok(Value::Null);
    }
    match data_type {
        DataType::String => Ok(Value::String(s.to_string())),
        DataType::Double => {
            let v = s.parse::<f64>().map_err(|e| {
                Error::Parse(format!("invalid double '{}' in column '{}': {}", s, column_name, e))
            })?;
            Ok(Value::Double(v.into()))
        }
        DataType::Bool => Ok(Value::Bool(s.to_lowercase() != "false")),
        DataType::Long => {
            let v = s.parse::<i64>().map_err(|e| {
                Error::Parse(format!("invalid long '{}' in column '{}': {}", s, column_name, e))
            })?;
            Ok(Value::Long(v))
        }
        DataType::UnsignedLong => {
            let v = s.parse::<u64>().map_err(|e| {
                Error::Parse(format!(
                    "invalid unsignedLong '{}' in column '{}': {}",
                    s, column_name, e
                ))
            })?;
            Ok(Value::UnsignedLong(v))
        }
        DataType::Duration => {
            let nanos = parse_duration(s).map_err(|_| {
                Error::Parse(format!("invalid duration '{}' in column '{}'", s, column_name))
            })?;
            Ok(Value::Duration(chrono::Duration::nanoseconds(nanos)))
        }
        DataType::Base64Binary => {
            let bytes = base64::engine::general_purpose::STANDARD.decode(s).map_err(|e| {
                Error::Parse(format!("invalid base64 '{}' in column '{}': {}", s, column_name, e))
            })?;
            Ok(Value::Bytes(bytes))
        }
        DataType::DateTime => {
            let t = DateTime::parse_from_rfc3339(s).map_err(|e| {
                Error::Parse(format!(
                    "invalid RFC3339 timestamp '{}' in column '{}': {}",
                    s, column_name, e
                ))
            })?;
            Ok(Value::Time(t))
        }
    }
}
