//! 命令定义和实现

pub mod config;

pub use config::ConfigCommand;
