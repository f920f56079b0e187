// Copyright 2012-2016 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This crate measures how well timing leak detectors find the
//! [KyberSlash](https://kyberslash.cr.yp.to/) division timing leak in Kyber implementations.
//!
//! The pipeline has four stages, each a subcommand of the `ksbench` binary:
//!
//!  1. **Payloads.** Generate collections of decapsulation inputs split into two classes. Class
//!     `X` is fixed (for KyberSlash payloads, a ciphertext whose `v` coefficients all hit the slow
//!     division path), class `Y` is fresh random key material. See [`payload`].
//!  2. **Timings.** Pipe every payload to a per-library measurement binary which reports the
//!     cycle count of one decapsulation, and store the results as `;`-separated CSV in the layouts
//!     the detectors read. See [`measure`] and [`samples`].
//!  3. **Verdicts.** Run Mona, dudect, a Welch t-test and RTLF on every timing file and record a
//!     binary leak verdict per (dataset, library) row next to the ground truth. See [`adapters`]
//!     and [`verdicts`].
//!  4. **Analysis.** Score each detector with a confusion matrix, Type-I/II error rates, accuracy
//!     and the Matthews correlation coefficient. See [`confusion`] and [`report`].
//!
//! The console output of the long-running stages looks like
//!
//! ```text
//! running 3 datasets
//! dataset 10k_0 pq-crystals-kyber-0  ... : Mona=ok Welch=ok dudect=leak
//! dataset 10k_0 pq-crystals-kyber-2  ... : Mona=leak Welch=leak dudect=leak
//! dataset 10k_0 pq-crystals-kyber-12 ... : Mona=leak Welch=ok dudect=leak
//! ```

pub mod adapters;
pub mod config;
pub mod confusion;
mod error;
pub mod kyber;
pub mod measure;
pub mod payload;
pub mod report;
pub mod runner;
pub mod samples;
mod stats;
pub mod verdicts;

pub use adapters::{ToolAdapter, Verdict};
pub use config::{Config, LibraryVariant};
pub use confusion::ConfusionSummary;
pub use error::{Error, Result};
pub use samples::{Class, CsvLayout, TimingData, TimingSample};
pub use verdicts::VerdictTable;
