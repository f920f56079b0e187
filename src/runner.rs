// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Console progress output and Ctrl-C handling shared by the long-running stages.

use std::io;
use std::io::prelude::*;
use std::iter::repeat;
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use crate::error::{Error, Result};

static STOP: AtomicBool = AtomicBool::new(false);

/// Installs a Ctrl-C handler. The first signal asks running loops to stop after the current
/// item, a second one exits immediately.
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        if STOP.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("interrupt received, stopping after the current item (press again to abort)");
    })
    .map_err(|e| Error::Config(format!("cannot install Ctrl-C handler: {}", e)))
}

/// Whether a stop was requested
pub fn interrupted() -> bool {
    STOP.load(Ordering::SeqCst)
}

/// Progress events emitted while working through a list of items
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    /// About to process the given items
    Begin(Vec<String>),
    /// Started one item
    Wait(String),
    /// Finished the current item with a one-line summary
    Result(String),
}

fn padded(name: &str, column_count: usize) -> String {
    let mut name = name.to_string();
    let fill = column_count.saturating_sub(name.len());
    let pad = repeat(" ").take(fill).collect::<String>();
    name.push_str(&pad);

    name
}

/// Writes `RunEvent`s to a terminal as aligned `item <name> ... : <result>` lines
pub struct ConsoleState<W: Write> {
    out: W,
    noun: &'static str,
    max_name_len: usize, // Number of columns to fill when aligning names
}

impl ConsoleState<io::Stdout> {
    pub fn stdout(noun: &'static str) -> ConsoleState<io::Stdout> {
        ConsoleState::new(io::stdout(), noun)
    }
}

impl<W: Write> ConsoleState<W> {
    pub fn new(out: W, noun: &'static str) -> ConsoleState<W> {
        ConsoleState {
            out,
            noun,
            max_name_len: 0,
        }
    }

    fn write_plain(&mut self, s: &str) -> io::Result<()> {
        self.out.write_all(s.as_bytes())?;
        self.out.flush()
    }

    fn write_run_start(&mut self, len: usize) -> io::Result<()> {
        let plural = if len != 1 { "s" } else { "" };
        self.write_plain(&format!("\nrunning {} {}{}\n", len, self.noun, plural))
    }

    fn write_item_start(&mut self, name: &str) -> io::Result<()> {
        let name = padded(name, self.max_name_len);
        self.write_plain(&format!("{} {} ... ", self.noun, name))
    }

    fn write_result(&mut self, summary: &str) -> io::Result<()> {
        self.write_plain(&format!(": {}\n", summary))
    }

    pub fn write_run_finish(&mut self, what: &str) -> io::Result<()> {
        self.write_plain(&format!("\n{} complete\n\n", what))
    }

    /// Handles one event
    pub fn on_event(&mut self, event: RunEvent) -> io::Result<()> {
        match event {
            RunEvent::Begin(names) => {
                self.max_name_len = names.iter().map(|n| n.len()).max().unwrap_or(0);
                self.write_run_start(names.len())
            }
            RunEvent::Wait(name) => self.write_item_start(&name),
            RunEvent::Result(summary) => self.write_result(&summary),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_aligns_names() {
        let mut st = ConsoleState::new(Vec::new(), "dataset");
        st.on_event(RunEvent::Begin(vec!["a".into(), "abc".into()])).unwrap();
        st.on_event(RunEvent::Wait("a".into())).unwrap();
        st.on_event(RunEvent::Result("ok".into())).unwrap();
        st.write_run_finish("verdicts").unwrap();

        let out = String::from_utf8(st.into_inner()).unwrap();
        assert_eq!(
            out,
            "\nrunning 2 datasets\ndataset a   ... : ok\n\nverdicts complete\n\n"
        );
    }

    #[test]
    fn not_interrupted_by_default() {
        assert!(!interrupted());
    }
}
