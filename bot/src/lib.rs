pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod irc;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;
