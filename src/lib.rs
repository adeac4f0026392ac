#![forbid(unsafe_code)]

pub mod book;
pub mod cache;
pub mod cli;
pub mod config;
pub mod epub;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod filter;
pub mod formats;
pub mod input;
pub mod logging;
pub mod partition;
pub mod pipeline;
pub mod retry;
