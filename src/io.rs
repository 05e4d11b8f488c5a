// src/io.rs
// User-facing message sink. Library code reports advisories through `Io`
// so the CLI decides how they are shown.

use colored::*;
use std::cell::RefCell;

pub trait Io {
    fn warning(&self, message: &str);
    fn info(&self, message: &str);
}

/// Writes to stderr the way the CLI always has: yellow "Warning:" prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleIo;

impl Io for ConsoleIo {
    fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
        eprintln!("{} {}", "Warning:".yellow(), message);
    }

    fn info(&self, message: &str) {
        eprintln!("{}", message);
    }
}

/// Collects messages in memory.
#[derive(Debug, Default)]
pub struct BufferIo {
    warnings: RefCell<Vec<String>>,
    infos: RefCell<Vec<String>>,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.borrow().clone()
    }
}

impl Io for BufferIo {
    fn warning(&self, message: &str) {
        self.warnings.borrow_mut().push(message.to_string());
    }

    fn info(&self, message: &str) {
        self.infos.borrow_mut().push(message.to_string());
    }
}
