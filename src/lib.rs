pub mod alarm;
pub mod camera;
pub mod config;
pub mod detection;
pub mod monitor;
pub mod pipeline;
pub mod pose;
pub mod remote;
pub mod retry;
pub mod services;

#[cfg(test)]
mod testing;
