pub mod client;
pub mod parser;
pub mod throttle;
pub mod translate;
