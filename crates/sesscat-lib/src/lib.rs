pub mod catalog;
pub mod download;
pub mod epochs;
pub mod manager;

pub use catalog::*;
pub use download::*;
pub use epochs::*;
pub use manager::*;
