//! Line-per-event daemon log.
//!
//! Every line is prefixed with an RFC 3339 local timestamp. Events go to
//! stdout, warnings and errors to stderr; the supervisor points both at
//! `.daemon.log`, so this is the whole logging pipeline.

use chrono::{DateTime, Local, SecondsFormat};
use std::io::Write;

pub fn format_line(at: DateTime<Local>, msg: &str) -> String {
    format!("[{}] {}", at.to_rfc3339_opts(SecondsFormat::Millis, false), msg)
}

pub fn log(msg: &str) {
    let line = format_line(Local::now(), msg);
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

pub fn log_stderr(msg: &str) {
    let line = format_line(Local::now(), msg);
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{line}");
}
