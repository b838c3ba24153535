//! Data models shared by every storage backend.
//!
//! `PutObject` is what callers hand to a backend; `ObjectInfo` is what they get
//! back alongside a body stream.

pub mod metadata;
pub mod object;
