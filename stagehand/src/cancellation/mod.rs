//! Run-level cooperative cancellation.

mod token;

pub use token::CancellationToken;
