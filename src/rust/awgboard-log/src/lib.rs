// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::sync::{atomic::AtomicBool, atomic::Ordering};

#[doc(hidden)]
pub use log as _log;

#[macro_export]
macro_rules! debug {
    ($msg:literal, $($arg:tt)+) => {
        awgboard_log::_log::debug!(target: concat!("awgboard.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        awgboard_log::_log::debug!(target: concat!("awgboard.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        awgboard_log::_log::info!(target: concat!("awgboard.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        awgboard_log::_log::info!(target: concat!("awgboard.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        awgboard_log::_log::warn!(target: concat!("awgboard.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        awgboard_log::_log::warn!(target: concat!("awgboard.rust::", module_path!()), $msg);
    };
}

/// Log at error level. Used when a bounded retry gives up or the link
/// cannot be brought into a usable state.
#[macro_export]
macro_rules! error {
    ($msg:literal, $($arg:tt)+) => {
        awgboard_log::_log::error!(target: concat!("awgboard.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        awgboard_log::_log::error!(target: concat!("awgboard.rust::", module_path!()), $msg);
    };
}

/// Log a diagnostic message at info level if diagnostics logging is enabled.
///
/// Diagnostics cover per-frame and per-register traffic, which is far too
/// chatty for the default log level.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if awgboard_log::is_diagnostics_enabled() {
             awgboard_log::_log::info!(target: concat!("awgboard.rust::", module_path!()), $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if awgboard_log::is_diagnostics_enabled() {
            awgboard_log::_log::info!(target: concat!("awgboard.rust::", module_path!()), $msg);
        }
    };
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS_ENABLED.load(Ordering::Acquire)
}

/// Initialize the logging.
///
/// This function is meant to be called once at the start of the program.
/// No concrete logger is installed; the host application chooses one and
/// the records arrive under the `awgboard.rust` target prefix.
pub fn init_logging(with_diagnostics: bool) {
    DIAGNOSTICS_ENABLED.store(with_diagnostics, Ordering::Release);
}
