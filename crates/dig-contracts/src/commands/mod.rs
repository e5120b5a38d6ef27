mod parser;
mod registry;

pub use parser::{parse_command, StudioCommand};
pub use registry::help_lines;
