//! Core data types for packages, advisories, and scan results.
//!
//! - [`Package`] - A resolved `name@version` pair to scan
//! - [`Advisory`] - A normalized vulnerability report for one package
//! - [`Level`] - Two-tier advisory severity (`fatal` / `warn`)
//! - [`ScanResult`] - Complete scan results
//!
//! # Example
//!
//! ```
//! use vulngate::{Package, ScanResult};
//!
//! let package = Package::new("lodash", "4.17.21");
//! let result = ScanResult::new(vec![package], Vec::new());
//!
//! println!("Scanned {} packages", result.packages.len());
//! ```

mod advisory;
mod package;

pub use advisory::*;
pub use package::*;
