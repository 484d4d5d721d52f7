pub mod icons;
pub mod progress;

pub use progress::{JobProgressUI, format_verdict};
