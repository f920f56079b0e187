// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Evaluation reports.
//!
//! A scenario is one directory of verdict tables (one per sample size), e.g. naive payloads
//! measured on a noisy machine. For every scenario this module prints the confusion summaries per
//! size and writes one chart series per attribute:
//!
//! ```text
//! Samples per class;MCC threshold;Mona Timing Report;Welch t-test;dudect;RTLF
//! 10k;0.5;0.0000;0.1250;-0.0833;0.2500
//! ```
//!
//! plus a markdown file tying the tables, series and axis ranges together.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::confusion::{summarize, ConfusionSummary};
use crate::error::Result;
use crate::runner::RunEvent;
use crate::samples::size_label;
use crate::verdicts::{load_size_table, verdicts_path};

/// Reference line drawn on MCC charts
pub const MCC_THRESHOLD: f64 = 0.5;

/// Name of a tool column as shown in charts
pub fn display_name(tool: &str) -> &str {
    match tool {
        "Mona" => "Mona Timing Report",
        "Welch" => "Welch t-test",
        other => other,
    }
}

/// A charted quantity of a confusion summary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribute {
    Accuracy,
    Mcc,
    TypeI,
    TypeII,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::Accuracy,
        Attribute::Mcc,
        Attribute::TypeI,
        Attribute::TypeII,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Accuracy => "Accuracy",
            Attribute::Mcc => "MCC",
            Attribute::TypeI => "Type-I",
            Attribute::TypeII => "Type-II",
        }
    }

    pub fn y_label(self) -> &'static str {
        match self {
            Attribute::Accuracy => "Accuracy",
            Attribute::Mcc => "MCC",
            Attribute::TypeI => "Type-I error",
            Attribute::TypeII => "Type-II error",
        }
    }

    pub fn subtitle(self) -> &'static str {
        match self {
            Attribute::Accuracy => "Tool accuracy rates",
            Attribute::Mcc => "Tool MCC values",
            Attribute::TypeI => "Tool Type-I error rates",
            Attribute::TypeII => "Tool Type-II error rates",
        }
    }

    /// Fixed y-axis range so charts of different scenarios compare directly
    pub fn y_range(self) -> (f64, f64) {
        match self {
            Attribute::Mcc => (-0.65, 0.65),
            Attribute::Accuracy => (-0.05, 0.75),
            Attribute::TypeI | Attribute::TypeII => (-0.05, 1.05),
        }
    }

    /// Rates are shown as percentages, MCC as a plain coefficient
    pub fn is_percentage(self) -> bool {
        self != Attribute::Mcc
    }

    pub fn value(self, s: &ConfusionSummary) -> f64 {
        match self {
            Attribute::Accuracy => s.accuracy,
            Attribute::Mcc => s.mcc,
            Attribute::TypeI => s.type_i,
            Attribute::TypeII => s.type_ii,
        }
    }
}

/// Confusion summaries of one sample size
#[derive(Clone, Debug, PartialEq)]
pub struct SizeResult {
    pub per_class: usize,
    pub summaries: Vec<ConfusionSummary>,
}

impl SizeResult {
    pub fn label(&self) -> String {
        size_label(self.per_class)
    }

    pub fn tool(&self, name: &str) -> Option<&ConfusionSummary> {
        self.summaries.iter().find(|s| s.tool == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioReport {
    pub title: String,
    pub sizes: Vec<SizeResult>,
}

impl ScenarioReport {
    /// Tools in the column order of the first size
    pub fn tools(&self) -> Vec<String> {
        self.sizes
            .first()
            .map(|s| s.summaries.iter().map(|c| c.tool.clone()).collect())
            .unwrap_or_default()
    }

    /// File-name friendly form of the title
    pub fn slug(&self) -> String {
        let mut slug = String::new();
        for c in self.title.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        slug.trim_end_matches('-').to_string()
    }

    /// Mean of `FN + TN` over every (size, tool) entry
    pub fn mean_negative_verdicts(&self) -> f64 {
        mean(
            self.sizes
                .iter()
                .flat_map(|s| s.summaries.iter())
                .map(|c| c.negative_verdicts() as f64),
        )
    }

    pub fn mean_of(&self, attribute: Attribute) -> f64 {
        mean_over(std::slice::from_ref(self), attribute)
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Mean of an attribute over every (scenario, size, tool) entry
pub fn mean_over(scenarios: &[ScenarioReport], attribute: Attribute) -> f64 {
    mean(
        scenarios
            .iter()
            .flat_map(|r| r.sizes.iter())
            .flat_map(|s| s.summaries.iter())
            .map(|c| attribute.value(c)),
    )
}

/// Fixed-width text table of the summaries of one size
pub fn format_summary_table(summaries: &[ConfusionSummary]) -> String {
    let width = summaries
        .iter()
        .map(|s| s.tool.len())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = format!(
        "{:w$} {:>6} {:>6} {:>6} {:>6} {:>8} {:>8} {:>8} {:>8}\n",
        "",
        "TP",
        "FN",
        "TN",
        "FP",
        "Type-I",
        "Type-II",
        "Accuracy",
        "MCC",
        w = width
    );
    for s in summaries {
        out.push_str(&format!(
            "{:w$} {:>6} {:>6} {:>6} {:>6} {:>8.4} {:>8.4} {:>8.4} {:>8.4}\n",
            s.tool,
            s.tp,
            s.fn_,
            s.tn,
            s.fp,
            s.type_i,
            s.type_ii,
            s.accuracy,
            s.mcc,
            w = width
        ));
    }
    out
}

/// Reads and summarizes the verdict tables of one scenario directory. Sizes without a verdict
/// file are skipped with a warning.
pub fn analyze_scenario<F>(
    title: &str,
    dir: &Path,
    sizes: &[usize],
    mut callback: F,
) -> Result<ScenarioReport>
where
    F: FnMut(RunEvent) -> io::Result<()>,
{
    let mut report = ScenarioReport {
        title: title.to_string(),
        sizes: Vec::new(),
    };
    callback(RunEvent::Begin(sizes.iter().map(|&n| size_label(n)).collect()))?;

    for &per_class in sizes {
        callback(RunEvent::Wait(size_label(per_class)))?;
        if !verdicts_path(dir, per_class).exists() {
            warn!(
                "{}: no verdicts at {}",
                title,
                verdicts_path(dir, per_class).display()
            );
            callback(RunEvent::Result("missing".to_string()))?;
            continue;
        }

        let table = load_size_table(dir, per_class)?;
        let summaries = summarize(&table)?;
        callback(RunEvent::Result(format!(
            "{} rows\n{}",
            table.len(),
            format_summary_table(&summaries)
        )))?;
        report.sizes.push(SizeResult {
            per_class,
            summaries,
        });
    }
    Ok(report)
}

fn create(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Writes one chart series. A tool missing at some size leaves its cell empty.
pub fn write_series_csv(path: &Path, report: &ScenarioReport, attribute: Attribute) -> Result<()> {
    let tools = report.tools();
    let mut out = create(path)?;

    write!(out, "Samples per class")?;
    if attribute == Attribute::Mcc {
        write!(out, ";MCC threshold")?;
    }
    for tool in &tools {
        write!(out, ";{}", display_name(tool))?;
    }
    writeln!(out)?;

    for size in &report.sizes {
        write!(out, "{}", size.label())?;
        if attribute == Attribute::Mcc {
            write!(out, ";{}", MCC_THRESHOLD)?;
        }
        for tool in &tools {
            match size.tool(tool) {
                Some(s) => write!(out, ";{:.4}", attribute.value(s))?,
                None => write!(out, ";")?,
            }
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn series_file_name(report: &ScenarioReport, attribute: Attribute) -> String {
    format!("{}_{}.csv", attribute.name(), report.slug())
}

fn fmt_value(attribute: Attribute, v: f64) -> String {
    if attribute.is_percentage() {
        format!("{:.1}%", 100.0 * v)
    } else {
        format!("{:.3}", v)
    }
}

/// Markdown rendering of the scenario reports and the statistics across them
pub fn render_markdown(reports: &[ScenarioReport]) -> String {
    let mut md = String::from("# Leak detector evaluation\n");

    for report in reports {
        md.push_str(&format!("\n## {}\n", report.title));

        for size in &report.sizes {
            md.push_str(&format!(
                "\n### {} samples per class\n\n| Tool | TP | FN | TN | FP | Type-I | Type-II | Accuracy | MCC |\n|---|---|---|---|---|---|---|---|---|\n",
                size.label()
            ));
            for s in &size.summaries {
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
                    display_name(&s.tool),
                    s.tp,
                    s.fn_,
                    s.tn,
                    s.fp,
                    s.type_i,
                    s.type_ii,
                    s.accuracy,
                    s.mcc
                ));
            }
        }

        let tools = report.tools();
        for attribute in Attribute::ALL {
            let (lo, hi) = attribute.y_range();
            md.push_str(&format!(
                "\n### {}\n\nSeries: `{}`. Y axis: {} from {} to {}.\n\n| Samples per class |",
                attribute.subtitle(),
                series_file_name(report, attribute),
                attribute.y_label(),
                fmt_value(attribute, lo),
                fmt_value(attribute, hi)
            ));
            for tool in &tools {
                md.push_str(&format!(" {} |", display_name(tool)));
            }
            md.push_str("\n|---|");
            md.push_str(&"---|".repeat(tools.len()));
            md.push('\n');
            for size in &report.sizes {
                md.push_str(&format!("| {} |", size.label()));
                for tool in &tools {
                    match size.tool(tool) {
                        Some(s) => md
                            .push_str(&format!(" {} |", fmt_value(attribute, attribute.value(s)))),
                        None => md.push_str(" |"),
                    }
                }
                md.push('\n');
            }
        }

        md.push_str(&format!(
            "\nAverage number of negative verdicts: {:.2}\n",
            report.mean_negative_verdicts()
        ));
    }

    md.push_str("\n## Statistics\n\n| Scenario | Mean MCC | Mean accuracy |\n|---|---|---|\n");
    for report in reports {
        md.push_str(&format!(
            "| {} | {:.4} | {:.4} |\n",
            report.title,
            report.mean_of(Attribute::Mcc),
            report.mean_of(Attribute::Accuracy)
        ));
    }
    md.push_str(&format!(
        "| All | {:.4} | {:.4} |\n",
        mean_over(reports, Attribute::Mcc),
        mean_over(reports, Attribute::Accuracy)
    ));
    md
}

/// Writes every chart series and `report.md` into `out_dir`, returning the written paths
pub fn write_reports(out_dir: &Path, reports: &[ScenarioReport]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();

    for report in reports {
        for attribute in Attribute::ALL {
            let path = out_dir.join(series_file_name(report, attribute));
            write_series_csv(&path, report, attribute)?;
            written.push(path);
        }
    }

    let path = out_dir.join("report.md");
    fs::write(&path, render_markdown(reports))?;
    written.push(path);

    info!("{} report files written to {}", written.len(), out_dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(v: &[u8]) -> Vec<bool> {
        v.iter().map(|&b| b == 1).collect()
    }

    fn report() -> ScenarioReport {
        let truth = bits(&[1, 1, 0, 0]);
        let mona = ConfusionSummary::from_column("Mona", &truth, &bits(&[1, 0, 0, 1])).unwrap();
        let welch = ConfusionSummary::from_column("Welch", &truth, &bits(&[1, 1, 0, 0])).unwrap();
        ScenarioReport {
            title: "Naive payloads - Low noise".to_string(),
            sizes: vec![
                SizeResult {
                    per_class: 10_000,
                    summaries: vec![mona.clone(), welch],
                },
                SizeResult {
                    per_class: 30_000,
                    summaries: vec![mona],
                },
            ],
        }
    }

    #[test]
    fn names_and_ranges() {
        assert_eq!(display_name("Mona"), "Mona Timing Report");
        assert_eq!(display_name("Welch"), "Welch t-test");
        assert_eq!(display_name("RTLF"), "RTLF");
        assert_eq!(Attribute::Mcc.y_range(), (-0.65, 0.65));
        assert_eq!(Attribute::Accuracy.y_range(), (-0.05, 0.75));
        assert_eq!(Attribute::TypeII.y_label(), "Type-II error");
    }

    #[test]
    fn slug_is_file_friendly() {
        assert_eq!(report().slug(), "naive-payloads-low-noise");
    }

    #[test]
    fn mcc_series_has_threshold_and_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("mcc.csv");
        write_series_csv(&p, &report(), Attribute::Mcc).unwrap();
        assert_eq!(
            fs::read_to_string(&p).unwrap(),
            "Samples per class;MCC threshold;Mona Timing Report;Welch t-test\n\
             10k;0.5;0.0000;1.0000\n\
             30k;0.5;0.0000;\n"
        );
    }

    #[test]
    fn aggregates() {
        let r = report();
        // Mona: FN + TN = 2, Welch: 2
        assert_eq!(r.mean_negative_verdicts(), 2.0);
        assert!((r.mean_of(Attribute::Mcc) - 1.0 / 3.0).abs() < 1e-12);
        assert!(mean_over(&[], Attribute::Mcc).is_nan());
    }

    #[test]
    fn markdown_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_reports(dir.path(), &[report()]).unwrap();
        assert_eq!(written.len(), 5);

        let md = fs::read_to_string(dir.path().join("report.md")).unwrap();
        assert!(md.contains("## Naive payloads - Low noise"));
        assert!(md.contains("| Mona Timing Report | 1 | 1 | 1 | 1 |"));
        assert!(md.contains("Y axis: MCC from -0.650 to 0.650"));
        assert!(md.contains("| 10k | 50.0% | 100.0% |"));
    }

    #[test]
    fn markdown_rows_are_one_per_line() {
        let md = render_markdown(&[report()]);
        assert!(md.ends_with(" |\n"));
        let all = md.lines().filter(|l| l.starts_with("| All | ")).count();
        assert_eq!(all, 1);
        // Every table row is closed before the next one starts
        assert!(md.lines().filter(|l| l.starts_with('|')).all(|l| l.ends_with('|')));
        assert!(md.contains("|---|---|---|---|---|---|---|---|---|\n| Mona Timing Report | "));
    }

    #[test]
    fn summary_table_lists_every_tool() {
        let r = report();
        let table = format_summary_table(&r.sizes[0].summaries);
        assert_eq!(table.lines().count(), 3);
        assert!(table.lines().nth(1).unwrap().starts_with("Mona "));
    }
}
