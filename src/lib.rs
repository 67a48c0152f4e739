//! # ep
//! Building blocks for distributed, columnar dataflow pipelines.
//!
//! This is a convenience package which includes the sub-projects of the
//! workspace, realistically you probably only want some of these projects:
//!
//! ### Features
//! - `ep_data` - The columnar `Column` / `Dataset` types batches are made of.
//! - `ep_exchange` - Scatter, gather and partition exchanges which move batches
//!   between the nodes of a cluster.
//!
//! ### Example
//! A single node gather exchange, every batch sent comes straight back
//! through the node's own short circuit.
//!
//! ```rust
//! use ep::data::{Column, Dataset};
//! use ep::exchange::{Distributer, Exchange, ExchangeConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let distributer = Distributer::bind("127.0.0.1:0").await?;
//!     let node = distributer.local_addr().to_string();
//!     let config = ExchangeConfig::new(distributer.clone(), [&node], &node, &node);
//!
//!     let mut exchange = Exchange::gather();
//!     exchange.init(&config).await?;
//!
//!     let batch = Dataset::new(vec![Column::texts(["hello", "world"])])?;
//!     exchange.send(batch.clone()).await?;
//!     exchange.finish().await?;
//!
//!     assert_eq!(exchange.recv().await?, Some(batch));
//!     assert_eq!(exchange.recv().await?, None);
//!
//!     exchange.close().await?;
//!     distributer.close().await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "ep-data")]
pub use ep_data as data;
#[cfg(feature = "ep-exchange")]
pub use ep_exchange as exchange;
