//! Operator Reporting
//!
//! Everything the admission workflow tells the operator goes through a
//! `Reporter`, so the core never writes to the console directly.

use std::io::{BufRead, IsTerminal, Write};

/// Sink for operator-facing messages
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Ask a yes/no question; `None` when nobody can answer
    fn confirm(&self, _question: &str) -> Option<bool> {
        None
    }
}

/// Reporter that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// Reporter printing to the terminal, prompting on stdin when interactive
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    interactive: bool,
}

impl ConsoleReporter {
    pub fn new(interactive: bool) -> Self {
        Self {
            interactive: interactive && std::io::stdin().is_terminal(),
        }
    }
}

impl Reporter for ConsoleReporter {
    fn info(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        println!("WARNING: {}", message);
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("ERROR: {}", message);
        tracing::error!("{}", message);
    }

    fn confirm(&self, question: &str) -> Option<bool> {
        if !self.interactive {
            return None;
        }

        print!("{} [y/N]: ", question);
        std::io::stdout().flush().ok()?;

        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer).ok()?;
        Some(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}
