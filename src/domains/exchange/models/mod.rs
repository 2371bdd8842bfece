pub mod order;
pub mod reservation;
pub mod fill;
pub mod price_level;

pub use order::*;
pub use reservation::*;
pub use fill::*;
pub use price_level::*;
