// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Two-sample t statistics over timing data: the single Welch test and dudect's
//! percentile-cropped family of Welch tests.

use std::cmp;

/// Result of a dudect run over a full timing file
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CtSummary {
    pub max_t: f64,
    pub max_tau: f64,
    pub sample_size: usize,
}

impl CtSummary {
    pub fn fmt(&self) -> String {
        format!(
            "n == {:+0.3}M, max t = {:+0.5}, max tau = {:+0.5}, (5/tau)^2 = {}",
            (self.sample_size as f64) / 1_000_000f64,
            self.max_t,
            self.max_tau,
            (5f64 / self.max_tau).powi(2) as usize
        )
    }
}

/// Running mean and sum of squared differences for both classes (Welford's method)
#[derive(Copy, Clone, Debug, Default)]
struct WelchAcc {
    means: (f64, f64),
    sq_diffs: (f64, f64),
    sizes: (usize, usize),
}

impl WelchAcc {
    fn push_x(&mut self, datum: f64) {
        self.sizes.0 += 1;
        let diff = datum - self.means.0;
        self.means.0 += diff / (self.sizes.0 as f64);
        self.sq_diffs.0 += diff * (datum - self.means.0);
    }

    fn push_y(&mut self, datum: f64) {
        self.sizes.1 += 1;
        let diff = datum - self.means.1;
        self.means.1 += diff / (self.sizes.1 as f64);
        self.sq_diffs.1 += diff * (datum - self.means.1);
    }

    fn t(&self) -> f64 {
        let num = self.means.0 - self.means.1;
        let n0 = self.sizes.0 as f64;
        let n1 = self.sizes.1 as f64;
        let var0 = self.sq_diffs.0 / (n0 - 1f64);
        let var1 = self.sq_diffs.1 / (n1 - 1f64);
        let den = (var0 / n0 + var1 / n1).sqrt();

        num / den
    }

    fn size(&self) -> usize {
        self.sizes.0 + self.sizes.1
    }
}

// NaNs are smaller than everything
fn local_cmp(x: f64, y: f64) -> cmp::Ordering {
    use std::cmp::Ordering::{Equal, Greater, Less};
    if y.is_nan() {
        Greater
    } else if x.is_nan() || x < y {
        Less
    } else if x == y {
        Equal
    } else {
        Greater
    }
}

/// Extract the `pct` percentile of a sorted, non-empty sample set using linear interpolation
fn percentile_of_sorted(sorted_samples: &[f64], pct: f64) -> f64 {
    debug_assert!(!sorted_samples.is_empty());
    debug_assert!((0f64..=100f64).contains(&pct));
    if sorted_samples.len() == 1 {
        return sorted_samples[0];
    }
    let length = (sorted_samples.len() - 1) as f64;
    let rank = (pct / 100f64) * length;
    let lrank = rank.floor();
    let d = rank - lrank;
    let n = lrank as usize;
    let lo = sorted_samples[n];
    let hi = sorted_samples[cmp::min(n + 1, sorted_samples.len() - 1)];
    lo + (hi - lo) * d
}

/// Return the cropping thresholds at f(1), f(2), ..., f(100) of the runtime distribution, where
/// `f(k) = 1 - 0.5^(10k / 100)`
pub fn prepare_percentiles(durations: &[u64]) -> Vec<f64> {
    if durations.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = durations.iter().map(|&d| d as f64).collect();
    sorted.sort_by(|a, b| local_cmp(*a, *b));

    (0..100)
        .map(|i| {
            let exp = f64::from(10 * (i + 1)) / 100f64;
            let pct = 1f64 - 0.5f64.powf(exp);
            percentile_of_sorted(&sorted, 100f64 * pct)
        })
        .collect()
}

/// Runs dudect's test family over `(x, y)` runtimes: one uncropped Welch test plus one test per
/// cropping threshold, keeping only samples below it. The test with the largest |t| is reported.
pub fn dudect_summary(x: &[u64], y: &[u64]) -> CtSummary {
    let percentiles = {
        let mut all = x.to_vec();
        all.extend_from_slice(y);
        prepare_percentiles(&all)
    };
    let mut tests = vec![WelchAcc::default(); percentiles.len() + 1];

    let x: Vec<f64> = x.iter().map(|&n| n as f64).collect();
    let y: Vec<f64> = y.iter().map(|&n| n as f64).collect();

    for &datum in &x {
        tests[0].push_x(datum);
    }
    for &datum in &y {
        tests[0].push_y(datum);
    }

    for (test, &pct) in tests.iter_mut().skip(1).zip(percentiles.iter()) {
        for &datum in x.iter().filter(|&&d| d < pct) {
            test.push_x(datum);
        }
        for &datum in y.iter().filter(|&&d| d < pct) {
            test.push_y(datum);
        }
    }

    let max_test = tests
        .iter()
        .copied()
        .max_by(|a, b| local_cmp(a.t().abs(), b.t().abs()))
        .unwrap_or_default();
    let sample_size = max_test.size();
    let max_t = max_test.t();
    let max_tau = max_t / (sample_size as f64).sqrt();

    CtSummary {
        max_t,
        max_tau,
        sample_size,
    }
}

/// Welch's unequal-variance t statistic of `x` against `y`. NaN when either side has fewer than
/// two samples.
pub fn welch_t(x: &[u64], y: &[u64]) -> f64 {
    let mut acc = WelchAcc::default();
    for &datum in x {
        acc.push_x(datum as f64);
    }
    for &datum in y {
        acc.push_y(datum as f64);
    }
    acc.t()
}
