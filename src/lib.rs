pub mod domains;
pub mod shared;
