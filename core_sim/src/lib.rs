pub mod bus;
pub mod cache;
pub mod common;
pub mod config;
pub mod sim;
pub mod stat;
pub mod trace;
pub mod write_buffer;
