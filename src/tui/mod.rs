//! TUI module for Raven CLI
//!
//! Terminal view of one channel's message stream using Ratatui.

mod app;
mod messages;
mod ui;

pub use app::run;
