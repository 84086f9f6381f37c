//! Corridor construction: raw envelopes and minimum-width repair.

mod bounds;
mod width;

pub use bounds::build_bounds;
pub use width::ensure_width;
