// Library exports for the standalone pluggable transport server

pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod signals;
