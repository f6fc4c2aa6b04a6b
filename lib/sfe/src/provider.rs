// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers let the engine run in different contexts by plugging in
//! implementations of core services. Logging is the only one so far:
//! a router daemon sends it to syslog, unit tests print it or collect
//! it for assertions. If a service doesn't have at least two obvious
//! implementations, it probably doesn't need to be a provider.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

use crate::ddi::sync::KMutex;

/// The execution context handed to the engine.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}

impl ExecCtx {
    pub fn println() -> Self {
        Self { log: Box::new(PrintlnLog) }
    }
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// A provider which keeps every message, for tests that assert on
/// what the engine reported.
#[derive(Default)]
pub struct MemLog {
    entries: KMutex<Vec<(LogLevel, String)>>,
}

impl MemLog {
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().clone()
    }
}

impl LogProvider for MemLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.entries.lock().push((level, msg.into()));
    }
}

impl<T: LogProvider + ?Sized> LogProvider for alloc::sync::Arc<T> {
    fn log(&self, level: LogLevel, msg: &str) {
        (**self).log(level, msg)
    }
}
