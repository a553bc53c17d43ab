//! Core data models for the support bot.
//!
//! `user` is the record persisted per Telegram user; `telegram` mirrors the
//! subset of Bot API objects the bot reads and writes.

pub mod telegram;
pub mod user;
