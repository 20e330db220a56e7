#![forbid(unsafe_code)]

pub mod analysis;
pub mod batch;
pub mod checkpoint;
pub mod cli;
pub mod engine;
pub mod execute;
pub mod formats;
pub mod invoker;
pub mod logging;
pub mod manifest;
pub mod openai;
pub mod scripts;
pub mod status;
pub mod topics;
