//! Diagnostic output for source-level problems.
//!
//! Every message carries the position it was produced at, formatted as
//! `<file>:<line>:<col> [ERROR] <message>`. The stages keep their own error
//! counters; this module only formats and prints.

use std::fmt;

pub fn error(file: &str, line: u32, col: u32, message: fmt::Arguments) {
    eprintln!("{file}:{line}:{col} [ERROR] {message}");
}

pub fn warning(file: &str, line: u32, col: u32, message: fmt::Arguments) {
    eprintln!("{file}:{line}:{col} [WARNING] {message}");
}
