pub mod config;
pub mod downstream;
pub mod error;
pub mod logger;
pub mod pages;
pub mod state;
