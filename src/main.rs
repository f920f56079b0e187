// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Command-line interface of the KyberSlash leak detector benchmark.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

use kyberslash_bench::adapters::{self, RtlfAdapter};
use kyberslash_bench::config::{Config, LibraryVariant};
use kyberslash_bench::measure::{measure_collection, CommandMeasurer};
use kyberslash_bench::payload::{
    generate_batch, CommandKeySource, KeySource, PayloadKind, PayloadOpts, RandomKeySource,
};
use kyberslash_bench::report::{self, analyze_scenario, ScenarioReport};
use kyberslash_bench::runner::{self, ConsoleState, RunEvent};
use kyberslash_bench::samples::{
    collection_name, parse_size_label, size_label, subsample_collection,
};
use kyberslash_bench::verdicts::{self, CollectOpts};

/// Evaluates timing leak detectors against KyberSlash-vulnerable Kyber builds.
#[derive(Parser)]
#[command(name = "ksbench", version, about)]
struct Cli {
    /// JSON file with tool locations, library variants and thresholds.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// More logging (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate payload collections `<size>_<first>` .. `<size>_<first + count - 1>`.
    Payloads {
        /// `naive` or `kyberslash`.
        #[arg(long, default_value = "kyberslash")]
        kind: PayloadKind,
        /// Payloads per class, e.g. `100k`.
        #[arg(long, value_parser = parse_size)]
        per_class: usize,
        #[arg(long, default_value_t = 0)]
        first: usize,
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Output directory holding one subdirectory per collection.
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
        /// Base seed of the class shuffles; collection `i` uses `seed + i`.
        #[arg(long)]
        seed: Option<u64>,
        /// Coefficient of the fixed KyberSlash ciphertext. Defaults to 3204, or to a draw from the
        /// legacy set with `--legacy-trigger`.
        #[arg(long)]
        slow_coefficient: Option<u32>,
        /// Use the earlier byte-repeating trigger ciphertext.
        #[arg(long)]
        legacy_trigger: bool,
        /// Draw the coefficient from the measured-slow set for each collection.
        #[arg(long, conflicts_with = "slow_coefficient")]
        random_coefficient: bool,
        /// Use seeded random bytes instead of the keygen program. Only useful for testing the
        /// pipeline, the measurement binaries will reject the keys.
        #[arg(long)]
        random_keys: bool,
        /// Overwrite existing collections.
        #[arg(long)]
        force: bool,
    },
    /// Time payload collections against library variants.
    Measure {
        /// Directory written by `payloads`.
        #[arg(long, value_name = "DIR")]
        payloads: PathBuf,
        #[arg(long, default_value = "kyberslash")]
        kind: PayloadKind,
        #[arg(long, value_parser = parse_size)]
        per_class: usize,
        #[arg(long, default_value_t = 0)]
        first: usize,
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Library variants to measure; all configured ones when omitted.
        #[arg(long = "library", value_name = "NAME")]
        libraries: Vec<String>,
        /// Output directory for the timing files.
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
    /// Derive smaller datasets from larger measured ones.
    Subsample {
        /// Directory holding the timing collections.
        #[arg(long, value_name = "DIR")]
        timings: PathBuf,
        /// Size of the measured collections, e.g. `100k`.
        #[arg(long, value_parser = parse_size)]
        from: usize,
        /// Size of the derived collections, e.g. `10k`.
        #[arg(long, value_parser = parse_size)]
        to: usize,
        #[arg(long, default_value_t = 0)]
        first: usize,
        #[arg(long, default_value_t = 1)]
        count: usize,
        #[arg(long = "library", value_name = "NAME")]
        libraries: Vec<String>,
    },
    /// Collect Mona, Welch and dudect verdicts into `<size>_verdicts.csv`.
    Verdicts {
        #[arg(long, value_name = "DIR")]
        timings: PathBuf,
        #[arg(long, value_parser = parse_size)]
        per_class: usize,
        #[arg(long, default_value_t = 0)]
        first: usize,
        #[arg(long)]
        count: usize,
        /// Verdict columns, in order.
        #[arg(long, value_delimiter = ',', default_value = "Mona,Welch,dudect")]
        tools: Vec<String>,
        #[arg(long = "library", value_name = "NAME")]
        libraries: Vec<String>,
        /// Directory for the verdict table.
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
    /// Collect RTLF verdicts for datasets `start .. start + len` into one part file.
    Rtlf {
        #[arg(long, value_name = "DIR")]
        timings: PathBuf,
        #[arg(long, value_parser = parse_size)]
        per_class: usize,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long, default_value_t = 25)]
        len: usize,
        #[arg(long = "library", value_name = "NAME")]
        libraries: Vec<String>,
        /// Verdict directory; the part lands in its `RTLF_parts/`.
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
    /// Merge the RTLF parts of one size into `<size>_verdicts_RTLF.csv`.
    MergeRtlf {
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, value_parser = parse_size)]
        per_class: usize,
    },
    /// Score the detectors and write chart series and a markdown report.
    Analyze {
        /// `TITLE=DIR` pairs, one per scenario.
        #[arg(
            long = "scenario",
            value_name = "TITLE=DIR",
            value_parser = parse_scenario,
            required = true
        )]
        scenarios: Vec<(String, PathBuf)>,
        #[arg(
            long,
            value_delimiter = ',',
            value_parser = parse_size,
            default_value = "10k,30k,50k,100k"
        )]
        sizes: Vec<usize>,
        /// Output directory for the report files.
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
}

fn parse_size(s: &str) -> std::result::Result<usize, String> {
    match parse_size_label(s) {
        Some(n) if n > 0 => Ok(n),
        _ => Err(format!("invalid sample size '{}', expected e.g. 10k or 250", s)),
    }
}

fn parse_scenario(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((title, dir)) if !title.is_empty() && !dir.is_empty() => {
            Ok((title.to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected TITLE=DIR, got '{}'", s)),
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    let mut builder = env_logger::builder();
    builder.format_target(false).format_timestamp(None).filter_level(level);
    // RUST_LOG still wins when set
    builder.parse_default_env();
    builder.init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    runner::install_interrupt_handler()?;

    let config = Config::load_or_default(cli.config.as_deref()).context("load configuration")?;

    match cli.command {
        Commands::Payloads {
            kind,
            per_class,
            first,
            count,
            out,
            seed,
            slow_coefficient,
            legacy_trigger,
            random_coefficient,
            random_keys,
            force,
        } => {
            let opts = PayloadOpts {
                kind,
                per_class,
                seed,
                slow_coefficient,
                legacy_trigger,
                random_coefficient,
                force,
            };
            if random_keys {
                let mut keys = RandomKeySource::seeded(seed.unwrap_or(0));
                cmd_payloads(&opts, &out, first, count, &mut keys)
            } else {
                let mut keys = CommandKeySource::new(config.tools.keygen.clone());
                cmd_payloads(&opts, &out, first, count, &mut keys)
            }
        }
        Commands::Measure {
            payloads,
            kind,
            per_class,
            first,
            count,
            libraries,
            out,
        } => {
            let libs = select_libraries(&config, &libraries)?;
            cmd_measure(&config, &payloads, kind, per_class, first..first + count, &libs, &out)
        }
        Commands::Subsample {
            timings,
            from,
            to,
            first,
            count,
            libraries,
        } => {
            let libs = select_libraries(&config, &libraries)?;
            cmd_subsample(&timings, from, to, first..first + count, &libs)
        }
        Commands::Verdicts {
            timings,
            per_class,
            first,
            count,
            tools,
            libraries,
            out,
        } => {
            let libs = select_libraries(&config, &libraries)?;
            let opts = CollectOpts {
                timing_root: &timings,
                per_class,
                datasets: first..first + count,
                libraries: &libs,
            };
            cmd_verdicts(&config, &opts, &tools, &out)
        }
        Commands::Rtlf {
            timings,
            per_class,
            start,
            len,
            libraries,
            out,
        } => {
            let libs = select_libraries(&config, &libraries)?;
            let opts = CollectOpts {
                timing_root: &timings,
                per_class,
                datasets: start..start + len,
                libraries: &libs,
            };
            cmd_rtlf(&config, &opts, &out)
        }
        Commands::MergeRtlf { dir, per_class } => {
            verdicts::merge_rtlf_parts(&dir, per_class)
                .with_context(|| format!("merge RTLF parts in {}", dir.display()))?;
            Ok(())
        }
        Commands::Analyze {
            scenarios,
            sizes,
            out,
        } => cmd_analyze(&scenarios, &sizes, &out),
    }
}

/// The named library variants, or all configured ones when no name is given
fn select_libraries(config: &Config, names: &[String]) -> Result<Vec<LibraryVariant>> {
    if names.is_empty() {
        return Ok(config.libraries.clone());
    }
    names
        .iter()
        .map(|name| match config.library(name) {
            Some(lib) => Ok(lib.clone()),
            None => bail!("library '{}' is not configured", name),
        })
        .collect()
}

fn cmd_payloads<K: KeySource>(
    opts: &PayloadOpts,
    out: &Path,
    first: usize,
    count: usize,
    keys: &mut K,
) -> Result<()> {
    let written = generate_batch(opts, out, first, count, keys)
        .with_context(|| format!("generate payloads in {}", out.display()))?;
    info!("{} collections written to {}", written.len(), out.display());
    Ok(())
}

fn cmd_measure(
    config: &Config,
    payloads: &Path,
    kind: PayloadKind,
    per_class: usize,
    datasets: std::ops::Range<usize>,
    libraries: &[LibraryVariant],
    out: &Path,
) -> Result<()> {
    let mut console = ConsoleState::stdout("collection");
    let names: Vec<String> = datasets
        .clone()
        .flat_map(|i| libraries.iter().map(move |lib| (i, lib)))
        .map(|(i, lib)| format!("{} {}", collection_name(per_class, i), lib.name))
        .collect();
    console.on_event(RunEvent::Begin(names))?;

    for i in datasets {
        let collection = collection_name(per_class, i);
        for lib in libraries {
            console.on_event(RunEvent::Wait(format!("{} {}", collection, lib.name)))?;
            let mut measurer = CommandMeasurer::for_library(lib);
            let data = measure_collection(
                payloads,
                &collection,
                kind,
                &lib.name,
                &mut measurer,
                config.warmup,
                out,
            )
            .with_context(|| format!("measure {} with {}", collection, lib.name))?;
            console.on_event(RunEvent::Result(format!("{} samples", data.len())))?;
        }
    }
    console.write_run_finish("measurement")?;
    Ok(())
}

fn cmd_subsample(
    timings: &Path,
    from: usize,
    to: usize,
    datasets: std::ops::Range<usize>,
    libraries: &[LibraryVariant],
) -> Result<()> {
    if to > from {
        bail!("cannot subsample {} from {}", size_label(to), size_label(from));
    }
    for i in datasets {
        if runner::interrupted() {
            bail!("interrupted");
        }
        for lib in libraries {
            subsample_collection(timings, from, to, i, &lib.name).with_context(|| {
                format!(
                    "subsample {} from {} for {}",
                    collection_name(to, i),
                    collection_name(from, i),
                    lib.name
                )
            })?;
        }
        info!("{} written", collection_name(to, i));
    }
    Ok(())
}

fn cmd_verdicts(
    config: &Config,
    opts: &CollectOpts<'_>,
    tools: &[String],
    out: &Path,
) -> Result<()> {
    let tools = adapters::tools_by_name(tools, config)?;
    let mut console = ConsoleState::stdout("dataset");
    let table = verdicts::collect_verdicts(opts, &tools, |e| console.on_event(e))
        .context("collect verdicts")?;
    console.write_run_finish("verdict collection")?;

    let path = verdicts::verdicts_path(out, opts.per_class);
    table
        .write_csv(&path)
        .with_context(|| format!("write {}", path.display()))?;
    info!("{} rows written to {}", table.len(), path.display());
    Ok(())
}

fn cmd_rtlf(config: &Config, opts: &CollectOpts<'_>, out: &Path) -> Result<()> {
    let rtlf = RtlfAdapter {
        rscript: config.tools.rscript.clone(),
        script: config.tools.rtlf_script.clone(),
    };
    let mut console = ConsoleState::stdout("dataset");
    let column = verdicts::collect_tool_column(opts, &rtlf, |e| console.on_event(e))
        .context("collect RTLF verdicts")?;
    console.write_run_finish("RTLF")?;

    let path = verdicts::rtlf_part_path(out, opts.per_class, &opts.datasets);
    column
        .write_csv(&path)
        .with_context(|| format!("write {}", path.display()))?;
    info!("{} RTLF verdicts written to {}", column.values.len(), path.display());
    Ok(())
}

fn cmd_analyze(scenarios: &[(String, PathBuf)], sizes: &[usize], out: &Path) -> Result<()> {
    let mut reports: Vec<ScenarioReport> = Vec::with_capacity(scenarios.len());
    for (title, dir) in scenarios {
        println!("########  {}  ########", title);
        let mut console = ConsoleState::stdout("size");
        let r = analyze_scenario(title, dir, sizes, |e| console.on_event(e))
            .with_context(|| format!("analyze {}", dir.display()))?;
        println!(
            "Average number of negative verdicts: {:.2}\n",
            r.mean_negative_verdicts()
        );
        reports.push(r);
    }

    println!("##### STATS #####");
    println!(
        "Mean MCC: {:.4}",
        report::mean_over(&reports, report::Attribute::Mcc)
    );
    println!(
        "Mean accuracy: {:.4}",
        report::mean_over(&reports, report::Attribute::Accuracy)
    );

    report::write_reports(out, &reports)
        .with_context(|| format!("write reports to {}", out.display()))?;
    Ok(())
}
