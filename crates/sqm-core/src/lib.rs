//! # SQM Core Library
//!
//! Data acquisition for Unihedron Sky Quality Meters.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The SQM line protocol (request encoding, reply validation)
//! - A serial link with timeout-bounded reads and explicit open/close
//! - A single-writer polling loop with bounded reconnect backoff
//! - A concurrent, optionally persisted record store
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sqm_core::prelude::*;
//!
//! let config = SqmConfig::load("sqm.json")?;
//! let store = Arc::new(Store::new(config.retention_capacity));
//! let link = SerialLink::new(config.link_config());
//! let mut poller = Poller::new(link, Arc::clone(&store), config.poller_config());
//!
//! std::thread::spawn(move || poller.run());
//! println!("latest: {:?}", store.latest());
//! ```

pub mod config;
pub mod poller;
pub mod protocol;
pub mod reading;
pub mod store;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, SqmConfig};
    pub use crate::poller::{
        Poller, PollerConfig, PollerError, PollerState, PollerStatus, StatusHandle, StopHandle,
    };
    pub use crate::protocol::{LinkConfig, ProtocolError, SerialLink};
    pub use crate::reading::Reading;
    pub use crate::store::{Average, AverageHistory, Record, Store, StoreError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
