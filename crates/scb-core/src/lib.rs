//! Core domain + application logic for the Student Council bot.
//!
//! This crate is framework-agnostic. Telegram and the Firebase document store
//! live behind ports (traits) implemented in adapter crates.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod fanout;
pub mod flows;
pub mod formatting;
pub mod jobs;
pub mod logging;
pub mod messaging;
pub mod ratelimit;
pub mod records;
pub mod registry;
pub mod roles;
pub mod scheduler;
pub mod session;
pub mod store;

pub use dispatch::{DispatchSettings, Dispatcher, Outcome};
pub use errors::{Error, Result};
