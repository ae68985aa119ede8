//! Channel Mover: relocate or purge channel messages.

pub mod commands;
pub mod config;
pub mod error;
pub mod jobs;
pub mod migration;
pub mod model;
pub mod policy;
pub mod purge;
pub mod scanner;
pub mod source;
pub mod time_window;
