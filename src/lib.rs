pub mod analysis;
pub mod app;
pub mod cli;
pub mod config;
pub mod fingerprint;
pub mod logging;
pub mod output;
pub mod requester;
pub mod runner;
pub mod scan;
pub mod transform;
pub mod utils;

#[cfg(test)]
mod tests;
