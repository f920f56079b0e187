// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::samples::Class;

/// Errors produced by the pipeline stages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A CSV file could not be parsed.
    #[error("{}:{line}: {message}", .path.display())]
    Csv {
        path: PathBuf,
        /// 1-indexed line number
        line: usize,
        message: String,
    },

    /// A timing file has no samples of the given class.
    #[error("no samples of class {class} in {}", .path.display())]
    MissingClass { class: Class, path: PathBuf },

    /// A ground-truth class is empty, so error rates are undefined.
    #[error("ground truth has no {0} rows")]
    EmptyClass(&'static str),

    #[error("payload error: {0}")]
    Payload(String),

    #[error("measurement failed: {0}")]
    Measurement(String),

    #[error("{tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// The run was stopped by Ctrl-C.
    #[error("interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;
