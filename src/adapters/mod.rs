//! Sage implementations.

pub mod sages;
