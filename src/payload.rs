// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Payload collections.
//!
//! A collection is a directory `<name>/` holding `<name>_payloads`, a gzip stream of decapsulation
//! inputs, and `<name>_classes`, one `X`/`Y` character per payload in the same order.
//!
//! Naive collections share a single decapsulation key: the stream starts with the key and is
//! followed by one ciphertext per class entry. KyberSlash collections store a full
//! key-and-ciphertext record per entry, since the random class draws a fresh key pair every time.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kyber::{
    fixed_ciphertext, legacy_slow_ciphertext, DEFAULT_SLOW_COEFFICIENT, KYBER512_CT_BYTES,
    KYBER512_DK_BYTES, KYBER512_RECORD_BYTES, LEGACY_SLOW_COEFFICIENTS, SLOW_COEFFICIENTS,
};
use crate::runner;
use crate::samples::{collection_name, Class};

/// How the two classes of a collection differ
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// One fixed key. X repeats one encapsulated ciphertext, Y encapsulates afresh each time.
    Naive,
    /// X pairs a fixed key with the KyberSlash trigger ciphertext, Y draws a fresh key pair and
    /// ciphertext each time.
    KyberSlash,
}

impl PayloadKind {
    /// Size of the shared header at the start of the decompressed stream
    pub fn header_len(self) -> usize {
        match self {
            PayloadKind::Naive => KYBER512_DK_BYTES,
            PayloadKind::KyberSlash => 0,
        }
    }

    /// Size of one per-entry record after the header
    pub fn record_len(self) -> usize {
        match self {
            PayloadKind::Naive => KYBER512_CT_BYTES,
            PayloadKind::KyberSlash => KYBER512_RECORD_BYTES,
        }
    }
}

impl FromStr for PayloadKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<PayloadKind, String> {
        match s.to_ascii_lowercase().as_str() {
            "naive" => Ok(PayloadKind::Naive),
            "kyberslash" => Ok(PayloadKind::KyberSlash),
            _ => Err(format!("unknown payload kind '{}'", s)),
        }
    }
}

/// A source of Kyber512 key pairs and matching ciphertexts
pub trait KeySource {
    /// Returns a fresh `(decapsulation key, ciphertext)` pair
    fn generate(&mut self) -> Result<(Vec<u8>, Vec<u8>)>;
}

/// Runs a key generation program that writes `dk || c` to stdout
#[derive(Clone, Debug)]
pub struct CommandKeySource {
    pub program: PathBuf,
}

impl CommandKeySource {
    pub fn new<P: Into<PathBuf>>(program: P) -> CommandKeySource {
        CommandKeySource {
            program: program.into(),
        }
    }
}

impl KeySource for CommandKeySource {
    fn generate(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let output = Command::new(&self.program)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                Error::Payload(format!("cannot run {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            return Err(Error::Payload(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }

        let mut stdout = output.stdout;
        if stdout.len() != KYBER512_RECORD_BYTES {
            return Err(Error::Payload(format!(
                "{} wrote {} bytes, expected {}",
                self.program.display(),
                stdout.len(),
                KYBER512_RECORD_BYTES
            )));
        }
        let ct = stdout.split_off(KYBER512_DK_BYTES);
        Ok((stdout, ct))
    }
}

/// Uniformly random bytes of the right sizes. Useful for dry runs of the pipeline where no key
/// generator is installed; the results are not valid Kyber keys.
pub struct RandomKeySource {
    rng: ChaCha20Rng,
}

impl RandomKeySource {
    pub fn seeded(seed: u64) -> RandomKeySource {
        RandomKeySource {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

impl KeySource for RandomKeySource {
    fn generate(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut dk = vec![0u8; KYBER512_DK_BYTES];
        let mut ct = vec![0u8; KYBER512_CT_BYTES];
        self.rng.fill_bytes(&mut dk);
        self.rng.fill_bytes(&mut ct);
        Ok((dk, ct))
    }
}

/// Options for generating one collection
#[derive(Clone, Debug)]
pub struct PayloadOpts {
    pub kind: PayloadKind,
    /// Number of payloads of each class
    pub per_class: usize,
    /// Seed for the class shuffle. A random seed is drawn when unset.
    pub seed: Option<u64>,
    /// Coefficient of the fixed KyberSlash ciphertext. Drawn per collection when unset.
    pub slow_coefficient: Option<u32>,
    /// Use the earlier byte-repeating trigger ciphertext instead of the packed one
    pub legacy_trigger: bool,
    /// Draw the packed trigger's coefficient from the measured-slow set
    pub random_coefficient: bool,
    /// Overwrite an existing collection directory
    pub force: bool,
}

impl Default for PayloadOpts {
    fn default() -> PayloadOpts {
        PayloadOpts {
            kind: PayloadKind::KyberSlash,
            per_class: 10,
            seed: None,
            slow_coefficient: None,
            legacy_trigger: false,
            random_coefficient: false,
            force: false,
        }
    }
}

impl PayloadOpts {
    /// The configured coefficient, else a draw from the legacy or measured-slow set, else
    /// `DEFAULT_SLOW_COEFFICIENT`
    pub fn trigger_coefficient<R: Rng>(&self, rng: &mut R) -> u32 {
        let pool: &[u32] = if self.legacy_trigger {
            &LEGACY_SLOW_COEFFICIENTS
        } else if self.random_coefficient {
            &SLOW_COEFFICIENTS
        } else {
            &[]
        };
        match self.slow_coefficient {
            Some(c) => c,
            None => pool.choose(rng).copied().unwrap_or(DEFAULT_SLOW_COEFFICIENT),
        }
    }
}

/// Paths of a collection's two files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionFiles {
    pub payloads: PathBuf,
    pub classes: PathBuf,
}

impl CollectionFiles {
    pub fn new(dir: &Path, name: &str) -> CollectionFiles {
        CollectionFiles {
            payloads: dir.join(format!("{}_payloads", name)),
            classes: dir.join(format!("{}_classes", name)),
        }
    }
}

/// `n` of each class in random order
pub fn shuffled_classes<R: Rng>(per_class: usize, rng: &mut R) -> Vec<Class> {
    let mut classes: Vec<Class> = std::iter::repeat(Class::X)
        .take(per_class)
        .chain(std::iter::repeat(Class::Y).take(per_class))
        .collect();
    classes.shuffle(rng);
    classes
}

/// Generates the collection `<out_dir>/<name>/`. Refuses to touch an existing directory unless
/// `opts.force` is set.
pub fn generate_collection<K: KeySource>(
    opts: &PayloadOpts,
    out_dir: &Path,
    name: &str,
    keys: &mut K,
) -> Result<CollectionFiles> {
    let dir = out_dir.join(name);
    if dir.exists() && !opts.force {
        return Err(Error::Payload(format!(
            "{} already exists, pass --force to overwrite",
            dir.display()
        )));
    }
    fs::create_dir_all(&dir)?;

    let mut rng = match opts.seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    };
    let classes = shuffled_classes(opts.per_class, &mut rng);
    let files = CollectionFiles::new(&dir, name);

    let mut enc = GzEncoder::new(
        BufWriter::new(File::create(&files.payloads)?),
        Compression::default(),
    );

    match opts.kind {
        PayloadKind::Naive => {
            let (dk, fixed_ct) = keys.generate()?;
            enc.write_all(&dk)?;
            for class in &classes {
                match class {
                    Class::X => enc.write_all(&fixed_ct)?,
                    Class::Y => enc.write_all(&keys.generate()?.1)?,
                }
            }
        }
        PayloadKind::KyberSlash => {
            let (fixed_dk, _) = keys.generate()?;
            let coefficient = opts.trigger_coefficient(&mut rng);
            debug!("{}: trigger coefficient {}", name, coefficient);
            let trigger = if opts.legacy_trigger {
                legacy_slow_ciphertext(coefficient)
            } else {
                fixed_ciphertext(coefficient)
            };
            for class in &classes {
                match class {
                    Class::X => {
                        enc.write_all(&fixed_dk)?;
                        enc.write_all(&trigger)?;
                    }
                    Class::Y => {
                        let (dk, ct) = keys.generate()?;
                        enc.write_all(&dk)?;
                        enc.write_all(&ct)?;
                    }
                }
            }
        }
    }
    enc.finish()?.flush()?;

    let labels: String = classes.iter().map(|c| c.as_char()).collect();
    fs::write(&files.classes, labels)?;

    debug!("wrote {} payloads to {}", classes.len(), files.payloads.display());
    Ok(files)
}

/// Generates collections `<size>_<first>` .. `<size>_<first + count - 1>`. Each collection gets
/// the seed `base_seed + index` when a base seed is given.
pub fn generate_batch<K: KeySource>(
    opts: &PayloadOpts,
    out_dir: &Path,
    first: usize,
    count: usize,
    keys: &mut K,
) -> Result<Vec<CollectionFiles>> {
    let mut written = Vec::with_capacity(count);
    for index in first..first + count {
        if runner::interrupted() {
            return Err(Error::Interrupted);
        }
        let name = collection_name(opts.per_class, index);
        let mut this_opts = opts.clone();
        this_opts.seed = opts.seed.map(|s| s.wrapping_add(index as u64));

        let start = std::time::Instant::now();
        written.push(generate_collection(&this_opts, out_dir, &name, keys)?);
        info!(
            "collection {} written in {:.3}s",
            name,
            start.elapsed().as_secs_f64()
        );
    }
    Ok(written)
}

/// Reads the classes file of a collection
pub fn read_classes(path: &Path) -> Result<Vec<Class>> {
    let raw = fs::read_to_string(path)?;
    raw.trim_end()
        .chars()
        .enumerate()
        .map(|(i, c)| {
            Class::from_char(c).ok_or_else(|| {
                Error::Payload(format!(
                    "{}: invalid class '{}' at position {}",
                    path.display(),
                    c,
                    i
                ))
            })
        })
        .collect()
}

/// Streams the decapsulation inputs of a payload file: `dk || c` for every entry, whatever the
/// on-disk layout.
pub struct PayloadReader {
    kind: PayloadKind,
    header: Vec<u8>,
    inner: GzDecoder<BufReader<File>>,
}

impl PayloadReader {
    pub fn open(path: &Path, kind: PayloadKind) -> Result<PayloadReader> {
        let mut inner = GzDecoder::new(BufReader::new(File::open(path)?));
        let mut header = vec![0u8; kind.header_len()];
        inner.read_exact(&mut header).map_err(|e| {
            Error::Payload(format!("{}: cannot read key header: {}", path.display(), e))
        })?;
        Ok(PayloadReader {
            kind,
            header,
            inner,
        })
    }

    /// Returns the next decapsulation input, or `None` at a clean end of stream
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
        let mut record = vec![0u8; self.kind.record_len()];
        let mut filled = 0;
        while filled < record.len() {
            match self.inner.read(&mut record[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => Ok(None),
            n if n < record.len() => Err(Error::Payload(format!(
                "truncated payload record: {} of {} bytes",
                n,
                record.len()
            ))),
            _ => {
                let mut payload = self.header.clone();
                payload.extend_from_slice(&record);
                Ok(Some(payload))
            }
        }
    }
}
