//! Testing utilities for code built on the migration runtime.
//!
//! [`MockAdapter`] stands in for a database so lock, transaction and ledger
//! interactions can be asserted without a server.

mod mock;

pub use mock::{AdapterCall, MockAdapter};
