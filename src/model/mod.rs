pub mod config;
pub mod node;
pub mod path;
pub mod record;

pub use config::*;
pub use node::*;
pub use record::*;
