// Shared errors
pub mod ledger_error;

pub use ledger_error::*;
