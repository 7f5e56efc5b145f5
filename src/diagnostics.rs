// ABOUTME: Collector for non-fatal cleanup failures.
// ABOUTME: Reported after the command so they never change its exit code.

use std::io::{self, Write};

/// Warnings gathered while tearing a session down.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<String>,
}

impl Diagnostics {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("Deferred warning: {}", message);
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Write one `warning:` line per collected message.
    pub fn report(&self, out: &mut impl Write) -> io::Result<()> {
        for warning in &self.warnings {
            writeln!(out, "warning: {warning}")?;
        }
        Ok(())
    }
}
