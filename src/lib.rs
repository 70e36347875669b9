#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod agent;
pub mod cli;
pub mod cobol;
pub mod config;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod session;
pub mod web;

#[cfg(test)]
mod test_support;
