pub mod allocation;
pub mod channels;
pub mod config;
