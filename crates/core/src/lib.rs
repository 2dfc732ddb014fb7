pub mod config;
pub mod error;
pub mod item;
pub mod schema;
pub mod source;

pub use config::Config;
pub use error::*;
pub use item::*;
pub use source::*;
