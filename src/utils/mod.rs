//! Utility functions

pub mod image;
pub mod math;
