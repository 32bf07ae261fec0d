pub mod config;
pub mod diff_types;
pub mod error;
pub mod types;

pub use config::*;
pub use diff_types::*;
pub use error::*;
pub use types::*;
