//! Terminal output for the `stv` commands.
//!
//! Status lines go to stdout, errors to stderr. Colors are only emitted when
//! the target stream supports them.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use stevedore_lib::package::Package;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One installed package per line; the type is shown in verbose mode.
pub fn print_package(package: &Package, verbose: bool) {
  let line = package_line(package, verbose);
  println!(
    "  {} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    line
  );
}

fn package_line(package: &Package, verbose: bool) -> String {
  if verbose {
    format!("{} {} ({})", package.name, package.version, package.package_type)
  } else {
    format!("{} {}", package.name, package.version)
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
