// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Timing collection. Each payload of a collection is piped to a measurement binary, which runs
//! one decapsulation and reports its own cycle count.

use std::cmp;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::config::{LibraryVariant, OutputFormat};
use crate::error::{Error, Result};
use crate::payload::{read_classes, CollectionFiles, PayloadKind, PayloadReader};
use crate::runner;
use crate::samples::{write_dataset, TimingData, TimingSample};

/// Something that times a single decapsulation input
pub trait Measurer {
    fn measure(&mut self, payload: &[u8]) -> Result<u64>;
}

/// Runs a measurement binary once per payload
#[derive(Clone, Debug)]
pub struct CommandMeasurer {
    pub program: PathBuf,
    pub format: OutputFormat,
}

impl CommandMeasurer {
    pub fn new<P: Into<PathBuf>>(program: P, format: OutputFormat) -> CommandMeasurer {
        CommandMeasurer {
            program: program.into(),
            format,
        }
    }

    pub fn for_library(lib: &LibraryVariant) -> CommandMeasurer {
        CommandMeasurer::new(lib.binary.clone(), lib.output)
    }
}

/// Parses a measurement binary's stdout
pub fn parse_cycles(stdout: &[u8], format: OutputFormat) -> Result<u64> {
    match format {
        OutputFormat::Decimal => {
            let text = String::from_utf8_lossy(stdout);
            text.trim()
                .parse::<u64>()
                .map_err(|_| Error::Measurement(format!("unparsable cycle count '{}'", text.trim())))
        }
        OutputFormat::LeU64 => {
            let bytes: [u8; 8] = stdout.try_into().map_err(|_| {
                Error::Measurement(format!("expected 8 bytes of output, got {}", stdout.len()))
            })?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

impl Measurer for CommandMeasurer {
    fn measure(&mut self, payload: &[u8]) -> Result<u64> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Measurement(format!("cannot run {}: {}", self.program.display(), e))
            })?;

        // A child that exits without reading its input closes the pipe early
        let written = match child.stdin.take() {
            Some(mut stdin) => match stdin.write_all(payload) {
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                res => res,
            },
            None => Ok(()),
        };
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(Error::Measurement(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        written?;
        parse_cycles(&output.stdout, self.format)
    }
}

/// Times every payload of a collection. The first `min(max_warmup, n / 2)` payloads are run once
/// beforehand and their timings discarded.
pub fn collect_timings<M: Measurer>(
    files: &CollectionFiles,
    kind: PayloadKind,
    measurer: &mut M,
    max_warmup: usize,
) -> Result<TimingData> {
    let classes = read_classes(&files.classes)?;

    let warmup = cmp::min(max_warmup, classes.len() / 2);
    let mut reader = PayloadReader::open(&files.payloads, kind)?;
    for _ in 0..warmup {
        match reader.next_payload()? {
            Some(payload) => {
                measurer.measure(&payload)?;
            }
            None => break,
        }
    }
    debug!("{} warm-up runs done", warmup);

    // Start over from the first payload
    let mut reader = PayloadReader::open(&files.payloads, kind)?;
    let mut samples = Vec::with_capacity(classes.len());
    while let Some(payload) = reader.next_payload()? {
        if runner::interrupted() {
            return Err(Error::Interrupted);
        }
        let class = *classes.get(samples.len()).ok_or_else(|| {
            Error::Measurement(format!(
                "{} holds more payloads than the {} classes listed",
                files.payloads.display(),
                classes.len()
            ))
        })?;
        let cycles = measurer.measure(&payload)?;
        samples.push(TimingSample {
            trial: samples.len(),
            class,
            cycles,
        });
    }

    if samples.len() != classes.len() {
        return Err(Error::Measurement(format!(
            "{} holds {} payloads, {} classes listed",
            files.payloads.display(),
            samples.len(),
            classes.len()
        )));
    }
    Ok(TimingData::new(samples))
}

/// Times the collection `<payload_root>/<collection>` against one library and writes both CSV
/// layouts under `<out_root>/<collection>/`.
pub fn measure_collection<M: Measurer>(
    payload_root: &Path,
    collection: &str,
    kind: PayloadKind,
    library: &str,
    measurer: &mut M,
    max_warmup: usize,
    out_root: &Path,
) -> Result<TimingData> {
    let dir = payload_root.join(collection);
    if !dir.is_dir() {
        return Err(Error::Payload(format!("no collection at {}", dir.display())));
    }
    let files = CollectionFiles::new(&dir, collection);

    let start = std::time::Instant::now();
    let data = collect_timings(&files, kind, measurer, max_warmup)?;
    write_dataset(out_root, collection, library, &data)?;
    info!(
        "{} / {}: {} samples in {:.3}s",
        collection,
        library,
        data.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{generate_collection, PayloadOpts, RandomKeySource};
    use crate::samples::Class;

    /// Reports a byte from the v part of the ciphertext as the cycle count
    struct VByte {
        calls: usize,
    }

    impl Measurer for VByte {
        fn measure(&mut self, payload: &[u8]) -> Result<u64> {
            self.calls += 1;
            Ok(u64::from(payload[crate::kyber::KYBER512_DK_BYTES + 700]))
        }
    }

    #[test]
    fn parses_both_formats() {
        assert_eq!(parse_cycles(b"12345\n", OutputFormat::Decimal).unwrap(), 12345);
        assert_eq!(
            parse_cycles(&77u64.to_le_bytes(), OutputFormat::LeU64).unwrap(),
            77
        );
        assert!(parse_cycles(b"abc", OutputFormat::Decimal).is_err());
        assert!(parse_cycles(b"1234", OutputFormat::LeU64).is_err());
    }

    #[test]
    fn warmup_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let opts = PayloadOpts {
            per_class: 30,
            seed: Some(9),
            ..Default::default()
        };
        let files =
            generate_collection(&opts, dir.path(), "30_0", &mut RandomKeySource::seeded(1))
                .unwrap();

        let mut m = VByte { calls: 0 };
        let data = collect_timings(&files, opts.kind, &mut m, 50).unwrap();
        assert_eq!(data.len(), 60);
        // min(50, 60 / 2) warm-up runs before the timed pass
        assert_eq!(m.calls, 90);

        // The trigger ciphertext's v part is all 0xff
        let classes = read_classes(&files.classes).unwrap();
        for (s, c) in data.samples.iter().zip(classes) {
            assert_eq!(s.class, c);
            if c == Class::X {
                assert_eq!(s.cycles, 0xff);
            }
        }
    }

    #[test]
    fn missing_collection_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = VByte { calls: 0 };
        let res = measure_collection(
            dir.path(),
            "nope",
            PayloadKind::Naive,
            "lib",
            &mut m,
            50,
            dir.path(),
        );
        assert!(matches!(res, Err(Error::Payload(_))));
    }
}
