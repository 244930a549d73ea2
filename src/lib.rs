//! A readers/writer access gate with a configurable priority policy, built on the primitives
//! available in the standard library.
//!
//! This library contains the following types:
//!
//! * [`RwGate`], a synchronization primitive that admits any number of concurrent readers or a
//!   single exclusive writer to a shared resource, and that favors one side or the other under
//!   contention according to a [`Priority`] chosen at construction.
//! * [`ReadPass`] and [`WritePass`], scope-based passes handed out by a gate that release their
//!   access when dropped.
//!
//! See the documentation on those types for further information.

#![deny(warnings, missing_docs)]

pub mod gate;

pub use crate::gate::{Priority, ReadPass, ReleaseError, RwGate, WritePass};
