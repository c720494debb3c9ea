//! Sage adapter implementations.

pub mod keyword;
pub mod mock;

pub use keyword::{builtin_sages, KeywordProfile, KeywordSage, BUILTIN_PROFILES};
pub use mock::{MockReply, MockSage};
