pub mod api;
pub mod automation_config;
pub mod config;
pub mod controllers;
pub mod store;
pub mod tls;
pub mod util;

#[cfg(test)]
pub mod tests;
