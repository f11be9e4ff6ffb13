//! # amity-shared
//!
//! Types shared by the Amity store and server: identifiers, the composite
//! `(sentAt, id)` order key, timestamp normalization, history paging and the
//! realtime/HTTP wire protocol.

pub mod constants;
pub mod error;
pub mod paging;
pub mod protocol;
pub mod time;
pub mod types;

pub use error::SharedError;
