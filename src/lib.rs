#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod catalog;
pub mod config;
pub mod drive;
pub mod fetcher;
pub mod item;
pub mod logging;
pub mod media;
pub mod navigator;
pub mod player;
pub mod reactions;
pub mod retry;
pub mod sort;
pub mod storage;
pub mod ui;
pub mod viewport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{list, run, RunOptions};
