pub mod database;
pub mod errors;
