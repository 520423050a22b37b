//! # influxdb2-client
//!
//! Async client for InfluxDB 2.x with a buffering write pipeline and a
//! streaming query decoder.
//!
//! ## Writing
//!
//! The asynchronous [`WriteApi`] batches records in the background and
//! retries transient server failures with a bounded retry buffer:
//!
//! ```ignore
//! use influxdb2_client::{Client, Point};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("http://localhost:8086", "my-token");
//!     let mut write_api = client.write_api("my-org", "my-bucket");
//!
//!     let mut point = Point::new("temperature");
//!     point.add_tag("room", "kitchen").add_field("value", 21.5);
//!     write_api.write_point(&point).await?;
//!
//!     write_api.close().await;
//!     Ok(())
//! }
//! ```
//!
//! The blocking [`WriteApiBlocking`] performs one request per call and
//! returns its outcome directly.
//!
//! ## Querying
//!
//! Query results stream record by record, so result sets of any size are
//! processed with constant memory:
//!
//! ```ignore
//! use influxdb2_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("http://localhost:8086", "my-token");
//!     let query_api = client.query_api("my-org");
//!
//!     let mut result = query_api.query(r#"
//!         from(bucket: "sensors")
//!         |> range(start: -30d)
//!         |> filter(fn: (r) => r._measurement == "temperature")
//!     "#).await?;
//!
//!     while result.next().await {
//!         let record = result.record().unwrap();
//!         println!(
//!             "{}: {} = {:?}",
//!             record.measurement().unwrap_or_default(),
//!             record.field().unwrap_or_default(),
//!             record.value()
//!         );
//!     }
//!     if let Some(err) = result.err() {
//!         return Err(err.to_string().into());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Batched writes**: size- and time-bounded batches, explicit flush,
//!   clean close semantics
//! - **Retry handling**: honors `Retry-After` on 429/503 with a bounded,
//!   overwrite-oldest retry buffer
//! - **Memory efficient queries**: annotated CSV decoded on the fly,
//!   heterogeneous table schemas preserved
//! - **All data types**: string, double, boolean, long, unsignedLong,
//!   duration, base64Binary, dateTime:RFC3339
//! - **Error handling**: all errors are returned as `Result`s; background
//!   write failures surface on a subscribable channel

pub mod client;
pub mod error;
pub mod options;
pub mod point;
pub mod query;
pub mod types;
pub mod value;
pub mod write_api;
pub mod write_blocking;

mod retry;
mod write_service;

// Re-export main types at crate root
pub use client::Client;
pub use error::{Error, Result};
pub use options::{Options, Precision};
pub use point::{Field, FieldValue, Point, Tag};
pub use query::{QueryApi, QueryTableResult};
pub use types::{DataType, FluxColumn, FluxRecord, FluxTableMetadata};
pub use value::Value;
pub use write_api::WriteApi;
pub use write_blocking::WriteApiBlocking;
