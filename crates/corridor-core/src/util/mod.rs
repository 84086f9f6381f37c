//! Utility modules.

mod time_parser;

pub use time_parser::{TimeParseError, parse_source_time};
