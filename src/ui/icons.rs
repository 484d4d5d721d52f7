//! Shared UI icons and emojis.
//!
//! Each icon has a plain-text fallback for terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP]");

// Progress indicators
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
