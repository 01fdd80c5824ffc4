//! datagate-pool — lifecycle manager for database client handles.
//!
//! # Architecture
//!
//! ```text
//! caller → acquire()
//!   → idle connection available      → hand it out (LIFO, keeps warm ones warm)
//!   → total < max                    → create via ConnectionFactory
//!   → exhausted                      → enqueue wait ticket (FIFO), race reply vs deadline
//! caller → release(conn)
//!   → oldest live waiter             → hand over directly
//!   → no waiter                      → back to the idle list
//! reaper task → close connections idle > idle_timeout, never below min
//! ```
//!
//! `query()` runs acquire → execute → release on a pool-owned task, so a
//! caller that stops waiting never strands a connection.

pub mod client;
pub mod config;
pub mod error;
pub mod pool;

pub use client::{ClientFuture, ConnectionFactory, DatabaseClient};
pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use pool::{ConnectionInfo, ConnectionPool, PoolHealth, PooledConnection};
