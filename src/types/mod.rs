// ABOUTME: Validated domain types shared by the library and the CLI.
// ABOUTME: Currently the parsed SSH connection target.

mod target;

pub use target::{ConnectionTarget, DEFAULT_PORT, DEFAULT_USER, ParseError, parse_addr};
