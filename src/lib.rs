//! Telegram bot answering questions through a prioritized pool of
//! ChatGPT-compatible backends.

pub mod api;
pub mod backend;
pub mod bot;
pub mod config;
pub mod storage;
pub mod telegram_log;
