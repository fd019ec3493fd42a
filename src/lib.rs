pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod ui;
