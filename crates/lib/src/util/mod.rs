//! Shared utilities.
//!
//! Hashing (cache keys, integrity digests) and small filesystem helpers.

pub mod fs;
pub mod hash;
