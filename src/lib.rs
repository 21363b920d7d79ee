//! Gerrit auto-review bot.
//!
//! Polls Gerrit for open changes the configured account is asked to
//! review and posts a Code-Review +2 once CI has verified the change, it
//! merges cleanly and every other reviewer has voted positively.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
