//! Service layer module

pub mod app;
pub mod types;

pub use app::Application;
pub use types::*;
