//! Utility modules for common functionality

mod string;

pub use string::{short_id, truncate_str};
