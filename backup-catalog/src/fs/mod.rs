//! File system helpers for the catalog.

pub mod remove;
