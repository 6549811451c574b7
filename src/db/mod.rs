pub mod entities;
pub mod persistent;
pub mod repositories;

pub use entities::*;
pub use persistent::Persistent;
