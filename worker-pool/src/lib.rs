//! # worker-pool
//!
//! A bounded event queue drained by a fixed number of worker threads.
//!
//! Every asynchronous hop in the notification pipeline (bus send, bus receive,
//! broker send, broker receive, change dispatch, inbound creation) goes through
//! one of these pools. The contract is deliberately small:
//!
//! - [`WorkerPool::submit`] never blocks. When the queue is full it returns
//!   `false` and the caller is expected to log which tunables to raise.
//! - Workers run the supplied handler closure for each item. Errors and panics are
//!   caught per item and logged; a worker never dies because of a bad item.
//! - [`WorkerPool::shutdown`] stops accepting work, drains what it can within
//!   the configured timeout and reports how many items were abandoned.
//! - Each worker publishes a [`WorkerStatus`] so a monitor can spot a worker
//!   that has been busy with one item for too long.
//!
//! ## Example
//!
//! ```rust
//! use worker_pool::{QueueSettings, WorkerPool};
//!
//! let settings = QueueSettings::new(2, 100);
//! let pool = WorkerPool::start("example", settings, |item: u32| {
//!     println!("processing {item}");
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert!(pool.submit(1));
//! let report = pool.shutdown();
//! assert_eq!(report.abandoned, 0);
//! ```

pub mod error;
pub mod pool;
pub mod settings;
pub mod status;

pub use error::{HandlerError, PoolError, Result};
pub use pool::{ShutdownReport, WorkerPool};
pub use settings::QueueSettings;
pub use status::{PoolStatus, WorkerStatus};
