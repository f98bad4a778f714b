//! redcapfs - Expose a REDCap project as a directory.
//!
//! Creating `demographics.csv` anywhere under the mount exports the
//! `demographics` instrument into it; `UCSD/Mar 2022/age.json` exports the
//! `age` measure for UCSD participants whose baseline was in March 2022.

pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod filter;
pub mod formatters;
pub mod records;
pub mod router;
pub mod storage;
pub mod vault;
pub mod watcher;

pub use client::{DataClient, HttpTransport, Transport};
pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
pub use filter::{ContextFilter, Roster};
pub use records::{ExportFormat, ExportTarget, Record, RecordSet};
pub use router::{DirAck, DirReady, EventKind, EventRouter, ExportReport, ExportStatus};
pub use vault::{CredentialVault, Credentials};
