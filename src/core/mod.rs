//! Core expansion logic: artifact loading, name binding, template expansion,
//! output resolution and layout merging.

pub mod binder;
pub mod engine;
pub mod error;
pub mod expander;
pub mod imports;
pub mod layout;
pub mod loader;
pub mod outputs;
pub mod references;
pub mod schema;
pub mod script;
pub mod types;
