pub mod client;
pub mod config;
pub mod execution;
pub mod plan;
pub mod render;

#[cfg(test)]
mod test_utils;
