pub mod controller;
pub mod tree_store;

pub use controller::*;
pub use tree_store::*;
