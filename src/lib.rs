#![forbid(unsafe_code)]

pub mod browser;
pub mod build;
pub mod cli;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod html;
pub mod logging;
pub mod openai;
pub mod publish;
pub mod resolve;
pub mod retry;
pub mod sites;
pub mod store;
pub mod translate;
