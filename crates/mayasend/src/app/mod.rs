//! Application layer turning editor state into commands and sends.

pub mod dispatch;
pub mod language;
pub mod package;
pub mod payload;
pub mod strip;
