//! Shared models and pure logic for mirroring design trees, selecting runs to
//! skip, and normalizing execution history.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod order;
pub mod report;
pub mod selection;
pub mod time;

pub use config::*;
pub use error::*;
pub use events::*;
pub use model::*;
pub use order::*;
pub use report::*;
pub use selection::*;
pub use time::*;
