pub mod args;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod manifest;
pub mod range_stream;
pub mod scheduler;
pub mod source;

pub use self::{
    config::EngineConfig,
    engine::Engine,
    error::{ErrorKind, Result, SourceError},
    handle::SourceHandle,
};

#[macro_use]
extern crate log;
