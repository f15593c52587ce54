//! Command-line entry points behind the `guanxin` binary.

pub mod commands;
pub mod ui;

pub use ui::Output;
