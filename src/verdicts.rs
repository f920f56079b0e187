// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Verdict tables.
//!
//! A verdict table has one row per (dataset, library) pair. The row index is
//! `dataset * libraries + library`, so tables produced separately (the slow RTLF runs) can be
//! joined back by index. On disk:
//!
//! ```text
//! ;Ground truth;Mona;Welch;dudect
//! 0;0;1;0;0
//! 1;1;1;1;1
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::adapters::{ToolAdapter, Verdict};
use crate::config::LibraryVariant;
use crate::error::{Error, Result};
use crate::runner::{self, RunEvent};
use crate::samples::{collection_name, size_label, timing_file_path};

pub const GROUND_TRUTH: &str = "Ground truth";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerdictRow {
    pub index: usize,
    pub truth: bool,
    /// One verdict per tool column
    pub verdicts: Vec<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerdictTable {
    pub tools: Vec<String>,
    pub rows: Vec<VerdictRow>,
}

/// A single named verdict column keyed by row index
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolColumn {
    pub name: String,
    pub values: BTreeMap<usize, bool>,
}

fn bit(b: bool) -> u8 {
    u8::from(b)
}

fn csv_err(path: &Path, line: usize, message: String) -> Error {
    Error::Csv {
        path: path.to_path_buf(),
        line,
        message,
    }
}

fn parse_bit(path: &Path, line: usize, cell: &str) -> Result<bool> {
    match cell.trim() {
        "0" | "False" | "false" => Ok(false),
        "1" | "True" | "true" => Ok(true),
        other => Err(csv_err(path, line, format!("expected 0 or 1, got '{}'", other))),
    }
}

fn parse_index(path: &Path, line: usize, cell: &str) -> Result<usize> {
    cell.trim()
        .parse()
        .map_err(|_| csv_err(path, line, format!("invalid row index '{}'", cell)))
}

/// Non-empty lines of a file with their 1-indexed line numbers
fn read_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push((i + 1, line));
        }
    }
    Ok(lines)
}

fn create(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

impl VerdictTable {
    pub fn new(tools: Vec<String>) -> VerdictTable {
        VerdictTable {
            tools,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn truth(&self) -> Vec<bool> {
        self.rows.iter().map(|r| r.truth).collect()
    }

    /// The verdicts of the `i`-th tool
    pub fn column(&self, i: usize) -> Vec<bool> {
        self.rows.iter().map(|r| r.verdicts[i]).collect()
    }

    pub fn tool_index(&self, name: &str) -> Option<usize> {
        self.tools.iter().position(|t| t == name)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut out = create(path)?;
        write!(out, ";{}", GROUND_TRUTH)?;
        for tool in &self.tools {
            write!(out, ";{}", tool)?;
        }
        writeln!(out)?;

        for row in &self.rows {
            write!(out, "{};{}", row.index, bit(row.truth))?;
            for &v in &row.verdicts {
                write!(out, ";{}", bit(v))?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<VerdictTable> {
        let lines = read_lines(path)?;
        let (header_line, header) = lines
            .first()
            .ok_or_else(|| csv_err(path, 1, "empty verdict file".to_string()))?;

        let cols: Vec<&str> = header.split(';').map(str::trim).collect();
        if cols.len() < 2 || cols[1] != GROUND_TRUTH {
            return Err(csv_err(
                path,
                *header_line,
                format!("expected header ';{};<tools>...'", GROUND_TRUTH),
            ));
        }
        let mut table = VerdictTable::new(cols[2..].iter().map(|s| s.to_string()).collect());

        for (line, text) in &lines[1..] {
            let cells: Vec<&str> = text.split(';').collect();
            if cells.len() != cols.len() {
                return Err(csv_err(
                    path,
                    *line,
                    format!("expected {} columns, got {}", cols.len(), cells.len()),
                ));
            }
            let verdicts = cells[2..]
                .iter()
                .map(|c| parse_bit(path, *line, c))
                .collect::<Result<Vec<bool>>>()?;
            table.rows.push(VerdictRow {
                index: parse_index(path, *line, cells[0])?,
                truth: parse_bit(path, *line, cells[1])?,
                verdicts,
            });
        }
        Ok(table)
    }

    /// Appends `column` by row index. Rows without a value in `column` are dropped.
    pub fn merge_column(&mut self, column: &ToolColumn) {
        let before = self.rows.len();
        self.rows.retain(|row| column.values.contains_key(&row.index));
        for row in self.rows.iter_mut() {
            row.verdicts.push(column.values[&row.index]);
        }
        self.tools.push(column.name.clone());

        let dropped = before - self.rows.len();
        if dropped > 0 {
            warn!(
                "{} rows have no {} verdict and were dropped",
                dropped, column.name
            );
        }
    }
}

impl ToolColumn {
    pub fn new(name: &str) -> ToolColumn {
        ToolColumn {
            name: name.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut out = create(path)?;
        writeln!(out, ";{}", self.name)?;
        for (index, &v) in &self.values {
            writeln!(out, "{};{}", index, bit(v))?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<ToolColumn> {
        let lines = read_lines(path)?;
        let (header_line, header) = lines
            .first()
            .ok_or_else(|| csv_err(path, 1, "empty verdict file".to_string()))?;
        let name = match header.split(';').map(str::trim).collect::<Vec<_>>().as_slice() {
            ["", name] => name.to_string(),
            _ => {
                return Err(csv_err(
                    path,
                    *header_line,
                    "expected header ';<tool>'".to_string(),
                ))
            }
        };

        let mut column = ToolColumn::new(&name);
        for (line, text) in &lines[1..] {
            match text.split(';').collect::<Vec<_>>().as_slice() {
                [index, v] => {
                    column
                        .values
                        .insert(parse_index(path, *line, index)?, parse_bit(path, *line, v)?);
                }
                cells => {
                    return Err(csv_err(
                        path,
                        *line,
                        format!("expected 2 columns, got {}", cells.len()),
                    ))
                }
            }
        }
        Ok(column)
    }

    /// Concatenates part columns. Later parts win on overlapping indices.
    pub fn concat(name: &str, parts: &[ToolColumn]) -> ToolColumn {
        let mut all = ToolColumn::new(name);
        for part in parts {
            all.values.extend(part.values.iter().map(|(&k, &v)| (k, v)));
        }
        all
    }
}

/// Verdict file of the standard tools for one sample size: `<dir>/<size>_verdicts.csv`
pub fn verdicts_path(dir: &Path, per_class: usize) -> PathBuf {
    dir.join(format!("{}_verdicts.csv", size_label(per_class)))
}

/// Merged RTLF column for one sample size: `<dir>/<size>_verdicts_RTLF.csv`
pub fn rtlf_path(dir: &Path, per_class: usize) -> PathBuf {
    dir.join(format!("{}_verdicts_RTLF.csv", size_label(per_class)))
}

/// RTLF part file for a dataset range: `<dir>/RTLF_parts/<size>_<first>-<last>.csv`
pub fn rtlf_part_path(dir: &Path, per_class: usize, datasets: &Range<usize>) -> PathBuf {
    dir.join("RTLF_parts").join(format!(
        "{}_{}-{}.csv",
        size_label(per_class),
        datasets.start,
        datasets.end.saturating_sub(1)
    ))
}

/// First dataset index of a part file named `<size>_<first>-<last>.csv`
fn part_start(path: &Path, size: &str) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let range = stem.strip_prefix(size)?.strip_prefix('_')?;
    let (first, last) = range.split_once('-')?;
    last.parse::<usize>().ok()?;
    first.parse().ok()
}

/// Concatenates the RTLF part files of one size in dataset order and writes the merged column
/// next to the verdict table.
pub fn merge_rtlf_parts(dir: &Path, per_class: usize) -> Result<ToolColumn> {
    let size = size_label(per_class);
    let mut parts = Vec::new();
    for entry in fs::read_dir(dir.join("RTLF_parts"))? {
        let path = entry?.path();
        if let Some(start) = part_start(&path, &size) {
            parts.push((start, path));
        }
    }
    parts.sort();

    let columns = parts
        .iter()
        .map(|(_, path)| ToolColumn::read_csv(path))
        .collect::<Result<Vec<_>>>()?;
    let merged = ToolColumn::concat("RTLF", &columns);
    merged.write_csv(&rtlf_path(dir, per_class))?;
    info!(
        "{} RTLF parts of size {} merged, {} rows",
        columns.len(),
        size,
        merged.values.len()
    );
    Ok(merged)
}

/// Where the timing files are and which ones to judge
#[derive(Clone, Debug)]
pub struct CollectOpts<'a> {
    /// Directory holding one subdirectory per collection
    pub timing_root: &'a Path,
    pub per_class: usize,
    pub datasets: Range<usize>,
    pub libraries: &'a [LibraryVariant],
}

impl<'a> CollectOpts<'a> {
    fn row_index(&self, dataset: usize, library: usize) -> usize {
        dataset * self.libraries.len() + library
    }

    fn items(&self) -> Vec<(usize, usize, String)> {
        self.datasets
            .clone()
            .flat_map(|i| {
                self.libraries.iter().enumerate().map(move |(j, lib)| {
                    (i, j, format!("{} {}", collection_name(self.per_class, i), lib.name))
                })
            })
            .collect()
    }

    fn input(&self, dataset: usize, library: &LibraryVariant, tool: &dyn ToolAdapter) -> PathBuf {
        timing_file_path(
            self.timing_root,
            &collection_name(self.per_class, dataset),
            &library.name,
            tool.layout(),
        )
    }
}

fn show(v: Verdict) -> &'static str {
    match v {
        Some(true) => "leak",
        Some(false) => "ok",
        None => "?",
    }
}

/// Runs every tool over every (dataset, library) pair. A row where any tool fails keeps its
/// ground truth but reports no leak for every tool, with a warning naming the file.
pub fn collect_verdicts<F>(
    opts: &CollectOpts<'_>,
    tools: &[Box<dyn ToolAdapter>],
    mut callback: F,
) -> Result<VerdictTable>
where
    F: FnMut(RunEvent) -> io::Result<()>,
{
    let mut table = VerdictTable::new(tools.iter().map(|t| t.name().to_string()).collect());
    let items = opts.items();
    callback(RunEvent::Begin(items.iter().map(|it| it.2.clone()).collect()))?;
    let mut failures = 0;

    for (i, j, name) in items {
        if runner::interrupted() {
            return Err(Error::Interrupted);
        }
        callback(RunEvent::Wait(name))?;

        let lib = &opts.libraries[j];
        let verdicts: Vec<Verdict> = tools
            .iter()
            .map(|tool| tool.analyze(&opts.input(i, lib, &**tool), opts.per_class))
            .collect();
        let summary = tools
            .iter()
            .zip(&verdicts)
            .map(|(t, &v)| format!("{}={}", t.name(), show(v)))
            .collect::<Vec<_>>()
            .join(" ");

        let row = match verdicts.iter().copied().collect::<Option<Vec<bool>>>() {
            Some(verdicts) => {
                callback(RunEvent::Result(summary))?;
                verdicts
            }
            None => {
                let failed: Vec<String> = tools
                    .iter()
                    .zip(&verdicts)
                    .filter(|(_, v)| v.is_none())
                    .map(|(t, _)| opts.input(i, lib, &**t).display().to_string())
                    .collect();
                warn!("problematic file(s), row counted as no leak: {}", failed.join(", "));
                failures += 1;
                callback(RunEvent::Result(format!("{} (no leak)", summary)))?;
                vec![false; tools.len()]
            }
        };
        table.rows.push(VerdictRow {
            index: opts.row_index(i, j),
            truth: lib.is_leaky(),
            verdicts: row,
        });
    }

    info!("{} rows collected, {} with failed tools", table.len(), failures);
    Ok(table)
}

/// Runs a single tool over the given range; unknown verdicts are left out of the column.
pub fn collect_tool_column<F>(
    opts: &CollectOpts<'_>,
    tool: &dyn ToolAdapter,
    mut callback: F,
) -> Result<ToolColumn>
where
    F: FnMut(RunEvent) -> io::Result<()>,
{
    let mut column = ToolColumn::new(tool.name());
    let items = opts.items();
    callback(RunEvent::Begin(items.iter().map(|it| it.2.clone()).collect()))?;

    for (i, j, name) in items {
        if runner::interrupted() {
            return Err(Error::Interrupted);
        }
        callback(RunEvent::Wait(name))?;
        let input = opts.input(i, &opts.libraries[j], tool);
        let verdict = tool.analyze(&input, opts.per_class);
        match verdict {
            Some(v) => {
                column.values.insert(opts.row_index(i, j), v);
            }
            None => warn!("problematic file, row skipped: {}", input.display()),
        }
        callback(RunEvent::Result(show(verdict).to_string()))?;
    }
    Ok(column)
}

/// Reads the verdict table for one sample size, joining the RTLF column when its file exists
pub fn load_size_table(dir: &Path, per_class: usize) -> Result<VerdictTable> {
    let mut table = VerdictTable::read_csv(&verdicts_path(dir, per_class))?;
    let rtlf = rtlf_path(dir, per_class);
    if rtlf.exists() {
        table.merge_column(&ToolColumn::read_csv(&rtlf)?);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> VerdictTable {
        VerdictTable {
            tools: vec!["Mona".into(), "Welch".into()],
            rows: vec![
                VerdictRow {
                    index: 0,
                    truth: false,
                    verdicts: vec![true, false],
                },
                VerdictRow {
                    index: 1,
                    truth: true,
                    verdicts: vec![true, true],
                },
                VerdictRow {
                    index: 5,
                    truth: true,
                    verdicts: vec![false, true],
                },
            ],
        }
    }

    #[test]
    fn table_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("v.csv");
        table().write_csv(&p).unwrap();
        assert_eq!(
            fs::read_to_string(&p).unwrap(),
            ";Ground truth;Mona;Welch\n0;0;1;0\n1;1;1;1\n5;1;0;1\n"
        );
        assert_eq!(VerdictTable::read_csv(&p).unwrap(), table());
    }

    #[test]
    fn rejects_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("v.csv");
        fs::write(&p, ";Truth;Mona\n0;0;1\n").unwrap();
        assert!(VerdictTable::read_csv(&p).is_err());
    }

    #[test]
    fn merge_joins_by_index() {
        let mut t = table();
        let mut rtlf = ToolColumn::new("RTLF");
        rtlf.values.insert(0, false);
        rtlf.values.insert(5, true);
        t.merge_column(&rtlf);

        assert_eq!(t.tools, ["Mona", "Welch", "RTLF"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows[1].verdicts, [false, true, true]);
    }

    #[test]
    fn parts_concatenate() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = ToolColumn::new("RTLF");
        a.values.insert(0, true);
        let mut b = ToolColumn::new("RTLF");
        b.values.insert(3, false);

        let pa = rtlf_part_path(dir.path(), 100_000, &(0..1));
        let pb = rtlf_part_path(dir.path(), 100_000, &(1..2));
        assert!(pa.ends_with("RTLF_parts/100k_0-0.csv"));
        a.write_csv(&pa).unwrap();
        b.write_csv(&pb).unwrap();

        let parts = [ToolColumn::read_csv(&pa).unwrap(), ToolColumn::read_csv(&pb).unwrap()];
        let all = ToolColumn::concat("RTLF", &parts);
        assert_eq!(all.values.len(), 2);
        assert_eq!(all.values[&3], false);
    }

    #[test]
    fn merged_parts_join_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let per_class = 10_000;
        table().write_csv(&verdicts_path(dir.path(), per_class)).unwrap();

        // Three libraries per dataset: dataset 0 is rows 0..3, dataset 1 is rows 3..6
        let mut first = ToolColumn::new("RTLF");
        first.values.extend([(0, true), (1, true), (2, false)]);
        let mut second = ToolColumn::new("RTLF");
        second.values.extend([(3, true), (4, true), (5, false)]);
        second.write_csv(&rtlf_part_path(dir.path(), per_class, &(1..2))).unwrap();
        first.write_csv(&rtlf_part_path(dir.path(), per_class, &(0..1))).unwrap();
        // Parts of other sizes are ignored
        first.write_csv(&rtlf_part_path(dir.path(), 30_000, &(0..1))).unwrap();

        let merged = merge_rtlf_parts(dir.path(), per_class).unwrap();
        assert_eq!(merged.values.len(), 6);
        assert!(rtlf_path(dir.path(), per_class).exists());

        let t = load_size_table(dir.path(), per_class).unwrap();
        assert_eq!(t.tools, ["Mona", "Welch", "RTLF"]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.rows[2].verdicts, [false, true, false]);
    }
}
