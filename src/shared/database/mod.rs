pub mod connection;
pub mod repositories;

pub use connection::Database;
pub use repositories::*;
