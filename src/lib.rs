// Library entrypoint for integration tests and internal reuse.
pub mod config;
pub mod convert;
pub mod jgrants;
pub mod registry;
pub mod schemas;
pub mod tools;
