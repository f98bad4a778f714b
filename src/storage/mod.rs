//! Storage module - Local file writes.
//!
//! Every file redcapfs produces (token store, exports, sentinels) is
//! written through [`write_atomic`]: readers see either the old content or
//! the complete new content, never a truncated file.

pub mod atomic;

pub use atomic::{write_atomic, PRIVATE_MODE, PUBLIC_MODE};
