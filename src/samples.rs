// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Timing sample files.
//!
//! Two `;`-delimited layouts exist for the same data. The *no-index* layout holds one
//! `CLASS;CYCLES` row per trial and is what dudect, RTLF and the Welch test read. The *index*
//! layout prefixes each row with the trial number (`0;X;1234`), which is what the Mona reporting
//! tool expects.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::error::{Error, Result};

/// Specifies the distribution that a particular trial belongs to
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Class {
    /// The fixed input class. For KyberSlash payloads this is the vulnerability-triggering one.
    X,
    /// The random input class
    Y,
}

impl Class {
    pub fn as_char(self) -> char {
        match self {
            Class::X => 'X',
            Class::Y => 'Y',
        }
    }

    pub fn from_char(c: char) -> Option<Class> {
        match c {
            'X' => Some(Class::X),
            'Y' => Some(Class::Y),
            _ => None,
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for Class {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Class, String> {
        let mut chars = s.chars();
        match (chars.next().and_then(Class::from_char), chars.next()) {
            (Some(class), None) => Ok(class),
            _ => Err(format!("unknown class label '{}'", s)),
        }
    }
}

/// One timed trial
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimingSample {
    /// Position of the trial in the measured collection, kept through subsampling
    pub trial: usize,
    pub class: Class,
    pub cycles: u64,
}

/// Which of the two on-disk layouts a timing file uses
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CsvLayout {
    Index,
    NoIndex,
}

impl CsvLayout {
    /// Directory and file-name component used for this layout
    pub fn dir_name(self) -> &'static str {
        match self {
            CsvLayout::Index => "index",
            CsvLayout::NoIndex => "no_index",
        }
    }
}

/// An ordered list of timing samples for one (collection, library) pair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimingData {
    pub samples: Vec<TimingSample>,
}

impl TimingData {
    pub fn new(samples: Vec<TimingSample>) -> TimingData {
        TimingData { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples of the given class
    pub fn count(&self, class: Class) -> usize {
        self.samples.iter().filter(|s| s.class == class).count()
    }

    /// Cycle counts of the given class, in trial order
    pub fn cycles_of(&self, class: Class) -> Vec<u64> {
        self.samples
            .iter()
            .filter(|s| s.class == class)
            .map(|s| s.cycles)
            .collect()
    }

    /// Splits the trials into `(X, Y)` runtimes
    pub fn split(&self) -> (Vec<u64>, Vec<u64>) {
        (self.cycles_of(Class::X), self.cycles_of(Class::Y))
    }

    /// Draws `per_class` samples of each class without replacement and shuffles the result. The
    /// same seed always gives the same subsample.
    pub fn subsample(&self, per_class: usize, seed: u64) -> Result<TimingData> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut picked = Vec::with_capacity(2 * per_class);

        for class in [Class::X, Class::Y] {
            let pool: Vec<TimingSample> =
                self.samples.iter().copied().filter(|s| s.class == class).collect();
            if pool.len() < per_class {
                return Err(Error::Payload(format!(
                    "cannot draw {} samples of class {} from {}",
                    per_class,
                    class,
                    pool.len()
                )));
            }
            picked.extend(pool.choose_multiple(&mut rng, per_class).copied());
        }

        picked.shuffle(&mut rng);
        Ok(TimingData::new(picked))
    }
}

/// Writes a timing file in the given layout, creating parent directories as needed.
pub fn write_timing_csv(path: &Path, data: &TimingData, layout: CsvLayout) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    for s in &data.samples {
        match layout {
            CsvLayout::Index => writeln!(out, "{};{};{}", s.trial, s.class, s.cycles)?,
            CsvLayout::NoIndex => writeln!(out, "{};{}", s.class, s.cycles)?,
        }
    }
    out.flush()?;
    Ok(())
}

/// Reads a timing file. Both layouts are accepted; the layout is detected per row from the
/// number of columns. Rows without an index column are numbered by position.
pub fn read_timing_csv(path: &Path) -> Result<TimingData> {
    let reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parse_err = |message: String| Error::Csv {
            path: path.to_path_buf(),
            line: line_num + 1,
            message,
        };

        let cols: Vec<&str> = line.split(';').map(str::trim).collect();
        let (trial, label, value) = match cols.as_slice() {
            [label, value] => (samples.len(), *label, *value),
            [index, label, value] => {
                let trial = index
                    .parse::<usize>()
                    .map_err(|_| parse_err(format!("invalid trial index '{}'", index)))?;
                (trial, *label, *value)
            }
            _ => return Err(parse_err(format!("expected 2 or 3 columns, got {}", cols.len()))),
        };

        let class = label.parse::<Class>().map_err(parse_err)?;
        let cycles = value
            .parse::<u64>()
            .map_err(|_| parse_err(format!("invalid cycle count '{}'", value)))?;
        samples.push(TimingSample {
            trial,
            class,
            cycles,
        });
    }

    Ok(TimingData::new(samples))
}

/// Like `read_timing_csv` but fails unless both classes are present
pub fn read_two_class_csv(path: &Path) -> Result<TimingData> {
    let data = read_timing_csv(path)?;
    for class in [Class::X, Class::Y] {
        if data.count(class) == 0 {
            return Err(Error::MissingClass {
                class,
                path: path.to_path_buf(),
            });
        }
    }
    Ok(data)
}

/// Path of a timing file:
/// `<root>/<collection>/<layout>/<collection>_<layout>_<library>_timing_measurements.csv`
pub fn timing_file_path(
    root: &Path,
    collection: &str,
    library: &str,
    layout: CsvLayout,
) -> PathBuf {
    let dir = layout.dir_name();
    let library = if library.is_empty() {
        String::new()
    } else {
        format!("_{}", library)
    };
    root.join(collection)
        .join(dir)
        .join(format!("{}_{}{}_timing_measurements.csv", collection, dir, library))
}

/// Writes both layouts of a dataset at their conventional locations
pub fn write_dataset(root: &Path, collection: &str, library: &str, data: &TimingData) -> Result<()> {
    for layout in [CsvLayout::Index, CsvLayout::NoIndex] {
        write_timing_csv(&timing_file_path(root, collection, library, layout), data, layout)?;
    }
    Ok(())
}

/// Label used in collection names: `10k` for 10000, the plain number below 1000
pub fn size_label(per_class: usize) -> String {
    if per_class >= 1000 {
        format!("{}k", per_class / 1000)
    } else {
        per_class.to_string()
    }
}

/// Inverse of `size_label`
pub fn parse_size_label(label: &str) -> Option<usize> {
    match label.strip_suffix('k') {
        Some(thousands) => thousands.parse::<usize>().ok().map(|n| n * 1000),
        None => label.parse().ok(),
    }
}

/// Name of the `index`-th collection of the given size, e.g. `100k_7`
pub fn collection_name(per_class: usize, index: usize) -> String {
    format!("{}_{}", size_label(per_class), index)
}

/// Derives the smaller dataset `<per_class>_<index>` of one library from the larger measured
/// `<source_per_class>_<index>`, seeded with `per_class + index`.
pub fn subsample_collection(
    root: &Path,
    source_per_class: usize,
    per_class: usize,
    index: usize,
    library: &str,
) -> Result<TimingData> {
    let source = timing_file_path(
        root,
        &collection_name(source_per_class, index),
        library,
        CsvLayout::Index,
    );
    let data = read_two_class_csv(&source)?;
    let smaller = data.subsample(per_class, (per_class + index) as u64)?;
    write_dataset(root, &collection_name(per_class, index), library, &smaller)?;
    Ok(smaller)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(spec: &[(Class, u64)]) -> TimingData {
        TimingData::new(
            spec.iter()
                .enumerate()
                .map(|(trial, &(class, cycles))| TimingSample {
                    trial,
                    class,
                    cycles,
                })
                .collect(),
        )
    }

    #[test]
    fn size_labels() {
        assert_eq!(size_label(10_000), "10k");
        assert_eq!(size_label(100_000), "100k");
        assert_eq!(size_label(10), "10");
        assert_eq!(parse_size_label("30k"), Some(30_000));
        assert_eq!(parse_size_label("250"), Some(250));
        assert_eq!(parse_size_label("k"), None);
        assert_eq!(collection_name(100_000, 7), "100k_7");
    }

    #[test]
    fn file_paths_follow_convention() {
        let p = timing_file_path(Path::new("out"), "10k_3", "pq-crystals-kyber-2", CsvLayout::NoIndex);
        assert_eq!(
            p,
            Path::new("out/10k_3/no_index/10k_3_no_index_pq-crystals-kyber-2_timing_measurements.csv")
        );
    }

    #[test]
    fn both_layouts_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let d = data(&[(Class::X, 10), (Class::Y, 20), (Class::X, 11)]);
        write_dataset(dir.path(), "3_0", "lib", &d).unwrap();

        for layout in [CsvLayout::Index, CsvLayout::NoIndex] {
            let p = timing_file_path(dir.path(), "3_0", "lib", layout);
            assert_eq!(read_timing_csv(&p).unwrap(), d);
        }

        let raw = fs::read_to_string(timing_file_path(dir.path(), "3_0", "lib", CsvLayout::Index))
            .unwrap();
        assert_eq!(raw, "0;X;10\n1;Y;20\n2;X;11\n");
    }

    #[test]
    fn bad_rows_report_line() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad.csv");
        fs::write(&p, "X;1\nZ;2\n").unwrap();
        match read_timing_csv(&p) {
            Err(Error::Csv { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_class_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x_only.csv");
        fs::write(&p, "X;1\nX;2\n").unwrap();
        assert!(matches!(
            read_two_class_csv(&p),
            Err(Error::MissingClass { class: Class::Y, .. })
        ));
    }

    #[test]
    fn subsample_keeps_class_balance() {
        let samples: Vec<(Class, u64)> = (0..100)
            .map(|i| (if i % 3 == 0 { Class::X } else { Class::Y }, i))
            .collect();
        let d = data(&samples);

        let sub = d.subsample(20, 7).unwrap();
        assert_eq!(sub.count(Class::X), 20);
        assert_eq!(sub.count(Class::Y), 20);
        assert_eq!(sub, d.subsample(20, 7).unwrap());
        assert!(d.subsample(40, 7).is_err());
    }

    #[test]
    fn smaller_collection_is_written_in_both_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<(Class, u64)> = (0..40)
            .map(|i| (if i % 2 == 0 { Class::X } else { Class::Y }, i))
            .collect();
        write_dataset(dir.path(), "20_3", "lib", &data(&samples)).unwrap();

        let sub = subsample_collection(dir.path(), 20, 5, 3, "lib").unwrap();
        assert_eq!(sub.len(), 10);
        let index = timing_file_path(dir.path(), "5_3", "lib", CsvLayout::Index);
        assert_eq!(read_timing_csv(&index).unwrap(), sub);

        let no_index = timing_file_path(dir.path(), "5_3", "lib", CsvLayout::NoIndex);
        let no_index = read_timing_csv(&no_index).unwrap();
        let strip = |d: &TimingData| -> Vec<(Class, u64)> {
            d.samples.iter().map(|s| (s.class, s.cycles)).collect()
        };
        assert_eq!(strip(&no_index), strip(&sub));
    }

    #[test]
    fn subsampled_rows_keep_their_trial_numbers() {
        let dir = tempfile::tempdir().unwrap();
        // Cycle counts encode the source row, so each trial can be checked against it
        let samples: Vec<(Class, u64)> = (0..40)
            .map(|i| (if i % 2 == 0 { Class::X } else { Class::Y }, 1000 + i))
            .collect();
        write_dataset(dir.path(), "20_0", "lib", &data(&samples)).unwrap();

        subsample_collection(dir.path(), 20, 5, 0, "lib").unwrap();
        let raw = fs::read_to_string(timing_file_path(dir.path(), "5_0", "lib", CsvLayout::Index))
            .unwrap();
        let rows: Vec<Vec<&str>> = raw.lines().map(|l| l.split(';').collect()).collect();
        assert_eq!(rows.len(), 10);
        for row in &rows {
            let trial: u64 = row[0].parse().unwrap();
            assert_eq!(row[2].parse::<u64>().unwrap(), 1000 + trial);
            assert_eq!(row[1], if trial % 2 == 0 { "X" } else { "Y" });
        }
        // Not renumbered
        let trials: Vec<&str> = rows.iter().map(|r| r[0]).collect();
        assert_ne!(trials, (0..10).map(|i| i.to_string()).collect::<Vec<_>>());
    }
}
