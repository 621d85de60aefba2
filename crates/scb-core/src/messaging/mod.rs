//! Messenger abstractions (Telegram today).

pub mod port;
pub mod throttled;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
