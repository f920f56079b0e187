// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Pipeline configuration.
//!
//! Everything has a default matching the layout the experiments were run with, so a config file
//! only needs the fields that differ:
//!
//! ```json
//! {
//!   "tools": { "dudect": "/opt/dudect/src/dudect", "mona_dir": "/opt/mona-timing-report" },
//!   "libraries": [
//!     { "name": "pq-crystals-kyber-0", "binary": "bin/kyber-0" },
//!     { "name": "circl-2", "binary": "bin/circl-2", "output": "le_u64", "leaky": true }
//!   ]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a measurement binary reports its cycle count on stdout
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// ASCII decimal, as printed by the C harnesses
    Decimal,
    /// Eight little-endian bytes, as written by the Go harnesses
    LeU64,
}

/// One build of a Kyber implementation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LibraryVariant {
    pub name: String,
    /// Measurement binary reading `dk || c` on stdin
    pub binary: PathBuf,
    #[serde(default = "default_output")]
    pub output: OutputFormat,
    /// Whether this build is known to leak. Derived from the name when unset.
    #[serde(default)]
    pub leaky: Option<bool>,
}

fn default_output() -> OutputFormat {
    OutputFormat::Decimal
}

impl LibraryVariant {
    /// A C build located at `./pqc_implementations/<name>/<name>`
    pub fn c(name: &str) -> LibraryVariant {
        LibraryVariant {
            name: name.to_string(),
            binary: Path::new("pqc_implementations").join(name).join(name),
            output: OutputFormat::Decimal,
            leaky: None,
        }
    }

    /// A Go build located at `./pqc_implementations/<name>/<name>`
    pub fn go(name: &str) -> LibraryVariant {
        LibraryVariant {
            output: OutputFormat::LeU64,
            ..LibraryVariant::c(name)
        }
    }

    /// Ground truth for this build. Variants are named `<library>-<version>`; version `0` is the
    /// patched build and every other version contains the vulnerable division.
    pub fn is_leaky(&self) -> bool {
        match self.leaky {
            Some(leaky) => leaky,
            None => self
                .name
                .rsplit('-')
                .next()
                .map(|version| version != "0")
                .unwrap_or(true),
        }
    }
}

/// Locations of the external programs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// The file-driven dudect build
    pub dudect: PathBuf,
    pub rscript: PathBuf,
    pub rtlf_script: PathBuf,
    pub java: PathBuf,
    /// Directory the Mona reporting tool runs in
    pub mona_dir: PathBuf,
    pub mona_jar: PathBuf,
    /// Program printing a Kyber512 `dk || c` pair
    pub keygen: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> ToolPaths {
        ToolPaths {
            dudect: PathBuf::from("dudect/src/dudect"),
            rscript: PathBuf::from("Rscript"),
            rtlf_script: PathBuf::from("RTLF/rtlf.R"),
            java: PathBuf::from("java"),
            mona_dir: PathBuf::from("mona-timing-report"),
            mona_jar: PathBuf::from("ReportingTool.jar"),
            keygen: PathBuf::from("pqc_payloads/keysAndCiphertext"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolPaths,
    pub libraries: Vec<LibraryVariant>,
    /// |t| above which the Welch test reports a leak
    pub welch_threshold: f64,
    /// |t| above which the in-process dudect test reports a leak
    pub dudect_threshold: f64,
    /// Upper bound on discarded warm-up runs per collection
    pub warmup: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            tools: ToolPaths::default(),
            libraries: ["pq-crystals-kyber-0", "pq-crystals-kyber-2", "pq-crystals-kyber-12"]
                .iter()
                .map(|name| LibraryVariant::c(name))
                .collect(),
            welch_threshold: 4.5,
            dudect_threshold: 4.5,
            warmup: 50,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, the defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Config::load(p),
            None => Ok(Config::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.libraries.is_empty() {
            return Err(Error::Config("no library variants configured".to_string()));
        }
        for (i, lib) in self.libraries.iter().enumerate() {
            if self.libraries[..i].iter().any(|other| other.name == lib.name) {
                return Err(Error::Config(format!("duplicate library '{}'", lib.name)));
            }
        }
        if !(self.welch_threshold > 0.0 && self.dudect_threshold > 0.0) {
            return Err(Error::Config("t thresholds must be positive".to_string()));
        }
        Ok(())
    }

    pub fn library(&self, name: &str) -> Option<&LibraryVariant> {
        self.libraries.iter().find(|lib| lib.name == name)
    }
}
