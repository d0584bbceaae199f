//! Domains module containing business logic organized by bounded contexts.
//!
//! - **tools**: the tool catalog, parameter schemas and validation
//! - **scene**: the mock scene engine run by the worker process

pub mod scene;
pub mod tools;
