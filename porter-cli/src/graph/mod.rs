//! Relation graph building and ordering

pub mod dependency;

pub use dependency::{DeferredEdge, DependencyCategory, DependencyGraph, GraphEdge};
