// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Leak detector adapters.
//!
//! Every detector is reduced to a binary verdict per timing file. The external tools report
//! through exit codes or console output:
//!
//! * dudect (file-driven build) and RTLF exit with 11 when the classes differ and 10 when they
//!   don't. Any other exit code means the run failed.
//! * The Mona reporting tool prints `no significant different result found` when it finds no
//!   difference. Any other output counts as a detected difference.
//!
//! The Welch test and the native dudect test run in-process on the parsed file.
//!
//! A detector that fails yields an unknown verdict (`None`) and a logged warning. Nothing is
//! retried.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use log::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::samples::{read_two_class_csv, CsvLayout};
use crate::stats;

/// `Some(true)` for a leak, `Some(false)` for none, `None` if the detector failed
pub type Verdict = Option<bool>;

/// Exit code used by dudect and RTLF when a difference was detected
pub const EXIT_LEAK: i32 = 11;
/// Exit code used by dudect and RTLF when no difference was detected
pub const EXIT_NO_LEAK: i32 = 10;

/// Output the Mona reporting tool prints when it finds no difference
pub const MONA_NO_DIFFERENCE: &str = "no significant different result found";

/// Common interface of the leak detectors
pub trait ToolAdapter {
    /// Column name in verdict tables
    fn name(&self) -> &str;

    /// Which timing file layout the tool reads
    fn layout(&self) -> CsvLayout {
        CsvLayout::NoIndex
    }

    /// Judges one timing file holding `per_class` samples of each class
    fn analyze(&self, input: &Path, per_class: usize) -> Verdict;
}

/// Maps the 11/10 exit code convention to a verdict
pub fn verdict_from_exit_code(code: Option<i32>) -> Verdict {
    match code {
        Some(EXIT_LEAK) => Some(true),
        Some(EXIT_NO_LEAK) => Some(false),
        _ => None,
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

fn run_captured(tool: &str, cmd: &mut Command) -> Option<Output> {
    debug!("{}: running {:?}", tool, cmd);
    match cmd.stdin(Stdio::null()).output() {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("{}: cannot run {:?}: {}", tool, cmd.get_program(), e);
            None
        }
    }
}

fn absolute(tool: &str, input: &Path) -> Option<PathBuf> {
    match fs::canonicalize(input) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("{}: cannot resolve {}: {}", tool, input.display(), e);
            None
        }
    }
}

// =============================================================================
// dudect
// =============================================================================

/// Runs the file-driven dudect build: `dudect -f <csv> -n <line count>`
#[derive(Clone, Debug)]
pub struct DudectAdapter {
    pub program: PathBuf,
}

impl DudectAdapter {
    pub fn new<P: Into<PathBuf>>(program: P) -> DudectAdapter {
        DudectAdapter {
            program: program.into(),
        }
    }
}

impl ToolAdapter for DudectAdapter {
    fn name(&self) -> &str {
        "dudect"
    }

    fn analyze(&self, input: &Path, per_class: usize) -> Verdict {
        let lines = 2 * per_class;
        let output = run_captured(
            self.name(),
            Command::new(&self.program)
                .arg("-f")
                .arg(input)
                .arg("-n")
                .arg(lines.to_string()),
        )?;

        let verdict = verdict_from_exit_code(output.status.code());
        if verdict.is_none() {
            warn!(
                "dudect: {} exited with {}: {}",
                input.display(),
                output.status,
                combined_output(&output).trim()
            );
        }
        verdict
    }
}

/// dudect's percentile-cropped t-test family computed in-process
#[derive(Clone, Debug)]
pub struct NativeDudectAdapter {
    pub t_threshold: f64,
}

impl Default for NativeDudectAdapter {
    fn default() -> NativeDudectAdapter {
        NativeDudectAdapter { t_threshold: 4.5 }
    }
}

impl ToolAdapter for NativeDudectAdapter {
    fn name(&self) -> &str {
        "dudect-native"
    }

    fn analyze(&self, input: &Path, _per_class: usize) -> Verdict {
        let data = match read_two_class_csv(input) {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {}", self.name(), e);
                return None;
            }
        };
        let (x, y) = data.split();
        let summ = stats::dudect_summary(&x, &y);
        debug!("{}: {}: {}", self.name(), input.display(), summ.fmt());

        if summ.max_t.is_nan() {
            warn!("{}: {}: t statistic undefined, no leak", self.name(), input.display());
        }
        // NaN never exceeds the threshold
        Some(summ.max_t.abs() > self.t_threshold)
    }
}

// =============================================================================
// Mona
// =============================================================================

/// Runs the Mona timing reporting tool inside its own directory on an index-layout file
#[derive(Clone, Debug)]
pub struct MonaAdapter {
    pub java: PathBuf,
    pub jar: PathBuf,
    pub work_dir: PathBuf,
}

impl ToolAdapter for MonaAdapter {
    fn name(&self) -> &str {
        "Mona"
    }

    fn layout(&self) -> CsvLayout {
        CsvLayout::Index
    }

    fn analyze(&self, input: &Path, _per_class: usize) -> Verdict {
        let input = absolute(self.name(), input)?;
        let output = run_captured(
            self.name(),
            Command::new(&self.java)
                .arg("-jar")
                .arg(&self.jar)
                .arg("--inputFile")
                .arg(&input)
                .arg("--name")
                .arg("Report")
                .current_dir(&self.work_dir),
        )?;

        Some(!combined_output(&output).contains(MONA_NO_DIFFERENCE))
    }
}

// =============================================================================
// RTLF
// =============================================================================

/// Runs `Rscript rtlf.R -i <csv> -q`
#[derive(Clone, Debug)]
pub struct RtlfAdapter {
    pub rscript: PathBuf,
    pub script: PathBuf,
}

impl ToolAdapter for RtlfAdapter {
    fn name(&self) -> &str {
        "RTLF"
    }

    fn analyze(&self, input: &Path, _per_class: usize) -> Verdict {
        let input = absolute(self.name(), input)?;
        let output = run_captured(
            self.name(),
            Command::new(&self.rscript)
                .arg(&self.script)
                .arg("-i")
                .arg(&input)
                .arg("-q"),
        )?;

        let verdict = verdict_from_exit_code(output.status.code());
        if verdict.is_none() {
            warn!(
                "RTLF: {} exited with {}: {}",
                input.display(),
                output.status,
                combined_output(&output).trim()
            );
        }
        verdict
    }
}

// =============================================================================
// Welch
// =============================================================================

/// A single Welch t-test between class X and class Y
#[derive(Clone, Debug)]
pub struct WelchAdapter {
    pub t_threshold: f64,
}

impl Default for WelchAdapter {
    fn default() -> WelchAdapter {
        WelchAdapter { t_threshold: 4.5 }
    }
}

impl ToolAdapter for WelchAdapter {
    fn name(&self) -> &str {
        "Welch"
    }

    fn analyze(&self, input: &Path, _per_class: usize) -> Verdict {
        let data = match read_two_class_csv(input) {
            Ok(data) => data,
            Err(e) => {
                warn!("Welch: {}", e);
                return None;
            }
        };
        let (x, y) = data.split();
        let t = stats::welch_t(&x, &y);
        debug!("Welch: {}: |t| = {:.3}", input.display(), t.abs());

        if t.is_nan() {
            warn!("Welch: {}: t statistic undefined, no leak", input.display());
        }
        Some(t.abs() > self.t_threshold)
    }
}

// =============================================================================
// Construction from config
// =============================================================================

/// Names accepted by `tool_by_name`
pub const TOOL_NAMES: [&str; 5] = ["Mona", "Welch", "dudect", "RTLF", "dudect-native"];

/// Builds the named detector. Names are matched case-insensitively.
pub fn tool_by_name(name: &str, config: &Config) -> Option<Box<dyn ToolAdapter>> {
    let tools = &config.tools;
    let adapter: Box<dyn ToolAdapter> = match name.to_ascii_lowercase().as_str() {
        "mona" => Box::new(MonaAdapter {
            java: tools.java.clone(),
            jar: tools.mona_jar.clone(),
            work_dir: tools.mona_dir.clone(),
        }),
        "welch" => Box::new(WelchAdapter {
            t_threshold: config.welch_threshold,
        }),
        "dudect" => Box::new(DudectAdapter::new(tools.dudect.clone())),
        "dudect-native" => Box::new(NativeDudectAdapter {
            t_threshold: config.dudect_threshold,
        }),
        "rtlf" => Box::new(RtlfAdapter {
            rscript: tools.rscript.clone(),
            script: tools.rtlf_script.clone(),
        }),
        _ => return None,
    };
    Some(adapter)
}

/// Builds every named detector, failing on the first unknown name
pub fn tools_by_name<S: AsRef<str>>(
    names: &[S],
    config: &Config,
) -> Result<Vec<Box<dyn ToolAdapter>>> {
    names
        .iter()
        .map(|name| {
            tool_by_name(name.as_ref(), config).ok_or_else(|| Error::Tool {
                tool: name.as_ref().to_string(),
                message: format!("unknown tool, expected one of {}", TOOL_NAMES.join(", ")),
            })
        })
        .collect()
}

/// The detectors run together per dataset, in verdict-table column order. RTLF is slow and runs
/// on its own.
pub fn standard_tools(config: &Config) -> Vec<Box<dyn ToolAdapter>> {
    ["Mona", "Welch", "dudect"]
        .iter()
        .filter_map(|name| tool_by_name(name, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(verdict_from_exit_code(Some(11)), Some(true));
        assert_eq!(verdict_from_exit_code(Some(10)), Some(false));
        assert_eq!(verdict_from_exit_code(Some(1)), None);
        assert_eq!(verdict_from_exit_code(None), None);
    }

    #[test]
    fn welch_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let leaky = dir.path().join("leaky.csv");
        let quiet = dir.path().join("quiet.csv");
        let mut a = String::new();
        let mut b = String::new();
        for i in 0..500u64 {
            a.push_str(&format!("X;{}\nY;{}\n", 1000 + i % 10, 1050 + i % 10));
            b.push_str(&format!("X;{}\nY;{}\n", 1000 + i % 10, 1000 + (i + 5) % 10));
        }
        fs::write(&leaky, a).unwrap();
        fs::write(&quiet, b).unwrap();

        let w = WelchAdapter::default();
        assert_eq!(w.analyze(&leaky, 500), Some(true));
        assert_eq!(w.analyze(&quiet, 500), Some(false));
        assert_eq!(w.analyze(&dir.path().join("missing.csv"), 500), None);

        let native = NativeDudectAdapter::default();
        assert_eq!(native.analyze(&leaky, 500), Some(true));
    }

    #[test]
    fn constant_timings_are_not_a_leak() {
        let dir = tempfile::tempdir().unwrap();
        let constant = dir.path().join("constant.csv");
        let one_class = dir.path().join("one_class.csv");
        fs::write(&constant, "X;5\nY;5\nX;5\nY;5\n").unwrap();
        fs::write(&one_class, "X;5\nX;7\n").unwrap();

        let w = WelchAdapter::default();
        assert_eq!(w.analyze(&constant, 2), Some(false));
        assert_eq!(w.analyze(&one_class, 2), None);

        let native = NativeDudectAdapter::default();
        assert_eq!(native.analyze(&constant, 2), Some(false));
        assert_eq!(native.analyze(&one_class, 2), None);
    }

    #[test]
    fn standard_tool_order() {
        let names: Vec<String> = standard_tools(&Config::default())
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["Mona", "Welch", "dudect"]);
        assert!(tool_by_name("rtlf", &Config::default()).is_some());
        assert!(tool_by_name("silent", &Config::default()).is_none());
        assert!(matches!(
            tools_by_name(&["welch", "silent"], &Config::default()),
            Err(Error::Tool { .. })
        ));
    }

    #[test]
    fn mona_reads_index_layout() {
        let mona = tool_by_name("mona", &Config::default()).unwrap();
        assert_eq!(mona.layout(), CsvLayout::Index);
    }
}
