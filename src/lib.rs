//! usrbio - Ring-mediated file I/O over shared-memory segments
//!
//! A client opens one file, registers it with a driver and exchanges data
//! with it through a pair of rings, one per direction. Payload bytes travel
//! through shared-memory segments registered as descriptors; the rings only
//! carry descriptors and completion results.
//!
//! - **Bounded I/O**: every read and write is checked against the size set
//!   with [`RingClient::set_size`] before any ring operation is issued
//! - **Chunked transfers**: requests larger than one segment are split into
//!   sequential ring operations of at most `chunk_capacity` bytes
//! - **Pluggable driver**: the client is generic over [`Driver`]; the crate
//!   ships [`LocalDriver`], which executes operations in-process
//!
//! # Architecture
//!
//! - **Client** ([`client`]): open, size, read, write, flush and teardown
//! - **Transport** ([`transport`]): driver traits, shared-memory segments,
//!   ring layout and the local driver
//! - **Mount resolution** ([`mount`]): maps a path to its mount point via
//!   `/proc/self/mountinfo`
//! - **Configuration** ([`config`]): block size, entries per segment, ring
//!   depth, loaded from TOML
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use usrbio::{ClientConfig, LocalDriver, RingClient};
//!
//! # fn example() -> Result<(), usrbio::UsrbioError> {
//! let driver = Arc::new(LocalDriver::new());
//! let config = ClientConfig::with_chunk_capacity(1 << 20);
//! let mut client = RingClient::open_with_config("/mnt/3fs/bench.dat", driver, &config)?;
//!
//! client.set_size(4 << 20)?;
//! client.write(0, &vec![0x61; 4 << 20])?;
//! client.flush()?;
//! let data = client.read(1 << 20, 4096)?;
//! assert_eq!(data.len(), 4096);
//!
//! client.close()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod mount;
pub mod transport;

pub use client::RingClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{UsrbioError, UsrbioResult};
pub use transport::{Driver, IoRing, LocalDriver};
