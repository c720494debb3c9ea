//! Port trait definitions (Hexagonal Architecture)
//!
//! - Sage: the capability contract every consultation agent implements
//!
//! The orchestrator only ever talks to agents through this trait, so any
//! implementation (local heuristics, remote services, test doubles) is
//! interchangeable.

pub mod sage;

pub use sage::Sage;
