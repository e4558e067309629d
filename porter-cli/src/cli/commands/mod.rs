//! Command handlers

pub mod export;
pub mod import;
pub mod registry;
pub mod schema;
pub mod template;
