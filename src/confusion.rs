// Copyright 2012 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Confusion-matrix statistics of detector verdicts against ground truth.

use crate::error::{Error, Result};
use crate::verdicts::VerdictTable;

/// Verdict quality of one detector over a verdict table
#[derive(Clone, Debug, PartialEq)]
pub struct ConfusionSummary {
    pub tool: String,
    pub tp: usize,
    pub fn_: usize,
    pub tn: usize,
    pub fp: usize,
    /// False-positive rate, FP / negatives
    pub type_i: f64,
    /// False-negative rate, FN / positives
    pub type_ii: f64,
    pub accuracy: f64,
    /// Matthews correlation coefficient
    pub mcc: f64,
}

impl ConfusionSummary {
    /// Builds the summary of one verdict column. Fails if either ground-truth class is empty,
    /// since one of the error rates would be undefined.
    pub fn from_column(tool: &str, truth: &[bool], verdicts: &[bool]) -> Result<ConfusionSummary> {
        debug_assert_eq!(truth.len(), verdicts.len());

        let positives = truth.iter().filter(|&&t| t).count();
        let negatives = truth.len() - positives;
        if positives == 0 {
            return Err(Error::EmptyClass("positive"));
        }
        if negatives == 0 {
            return Err(Error::EmptyClass("negative"));
        }

        let (mut tp, mut fp) = (0, 0);
        for (&t, &v) in truth.iter().zip(verdicts) {
            match (t, v) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                _ => {}
            }
        }
        let fn_ = positives - tp;
        let tn = negatives - fp;

        Ok(ConfusionSummary {
            tool: tool.to_string(),
            tp,
            fn_,
            tn,
            fp,
            type_i: fp as f64 / negatives as f64,
            type_ii: fn_ as f64 / positives as f64,
            accuracy: (tp + tn) as f64 / truth.len() as f64,
            mcc: mcc_from_counts(tp, tn, fp, fn_),
        })
    }

    /// Positive-truth rows
    pub fn positives(&self) -> usize {
        self.tp + self.fn_
    }

    /// Negative-truth rows
    pub fn negatives(&self) -> usize {
        self.tn + self.fp
    }

    /// Rows the detector judged as leak-free
    pub fn negative_verdicts(&self) -> usize {
        self.fn_ + self.tn
    }
}

/// `(TP·TN − FP·FN) / sqrt((TP+FP)(TP+FN)(TN+FP)(TN+FN))`, defined as 0 when any marginal is
/// empty.
pub fn mcc_from_counts(tp: usize, tn: usize, fp: usize, fn_: usize) -> f64 {
    let (tp, tn, fp, fn_) = (tp as f64, tn as f64, fp as f64, fn_ as f64);
    let den = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
    if den == 0.0 {
        return 0.0;
    }
    let mcc = (tp * tn - fp * fn_) / den;
    mcc.clamp(-1.0, 1.0)
}

/// Matthews correlation coefficient of a verdict vector against ground truth
pub fn matthews(truth: &[bool], predicted: &[bool]) -> f64 {
    let mut counts = [0usize; 4]; // tp, tn, fp, fn
    for (&t, &p) in truth.iter().zip(predicted) {
        let slot = match (t, p) {
            (true, true) => 0,
            (false, false) => 1,
            (false, true) => 2,
            (true, false) => 3,
        };
        counts[slot] += 1;
    }
    mcc_from_counts(counts[0], counts[1], counts[2], counts[3])
}

/// One summary per tool column, in column order
pub fn summarize(table: &VerdictTable) -> Result<Vec<ConfusionSummary>> {
    let truth = table.truth();
    table
        .tools
        .iter()
        .enumerate()
        .map(|(i, tool)| ConfusionSummary::from_column(tool, &truth, &table.column(i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bits(v: &[u8]) -> Vec<bool> {
        v.iter().map(|&b| b == 1).collect()
    }

    #[test]
    fn balanced_example() {
        let s = ConfusionSummary::from_column("t", &bits(&[1, 1, 0, 0]), &bits(&[1, 0, 0, 1]))
            .unwrap();
        assert_eq!((s.tp, s.fn_, s.fp, s.tn), (1, 1, 1, 1));
        assert_eq!(s.accuracy, 0.5);
        assert_eq!(s.type_i, 0.5);
        assert_eq!(s.type_ii, 0.5);
        assert_eq!(s.mcc, 0.0);
    }

    #[test]
    fn perfect_and_inverted() {
        let truth = bits(&[1, 0, 1, 0, 1]);
        assert!((matthews(&truth, &truth) - 1.0).abs() < 1e-12);
        let inverted: Vec<bool> = truth.iter().map(|t| !t).collect();
        assert!((matthews(&truth, &inverted) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_verdicts_have_zero_mcc() {
        let truth = bits(&[1, 1, 0]);
        let s = ConfusionSummary::from_column("t", &truth, &bits(&[1, 1, 1])).unwrap();
        assert_eq!(s.mcc, 0.0);
        assert_eq!(s.type_i, 1.0);
        assert_eq!(s.type_ii, 0.0);
    }

    #[test]
    fn empty_class_is_rejected() {
        let truth = bits(&[1, 1]);
        assert!(matches!(
            ConfusionSummary::from_column("t", &truth, &truth),
            Err(Error::EmptyClass("negative"))
        ));
    }

    proptest! {
        #[test]
        fn counts_partition_truth(rows in prop::collection::vec((any::<bool>(), any::<bool>()), 2..200)) {
            let truth: Vec<bool> = rows.iter().map(|r| r.0).collect();
            let verdicts: Vec<bool> = rows.iter().map(|r| r.1).collect();
            let positives = truth.iter().filter(|&&t| t).count();
            prop_assume!(positives > 0 && positives < truth.len());

            let s = ConfusionSummary::from_column("t", &truth, &verdicts).unwrap();
            prop_assert_eq!(s.tp + s.fn_, positives);
            prop_assert_eq!(s.fp + s.tn, truth.len() - positives);
            prop_assert!((-1.0..=1.0).contains(&s.mcc));
            prop_assert!((0.0..=1.0).contains(&s.accuracy));
            prop_assert!((s.mcc - matthews(&truth, &verdicts)).abs() < 1e-12);
        }
    }
}
