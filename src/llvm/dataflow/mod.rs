//! A generic forward dataflow solver over a function's block graph.
//!
//! Clients lower each block to a list of events once, then the solver only
//! ever flows facts through those lists. Block `Out` facts start at top and a
//! block whose `Out` drops queues its successors again, so `meet` must be
//! monotone.

use std::fmt;

use log::trace;

use super::cfg::{Graph, ENTRY};

pub mod validity;

pub trait DataflowFact: Clone + PartialEq + fmt::Debug {
    type Event;

    /// The fact at the function entry and after a barrier block
    fn boundary() -> Self;
    fn meet(&self, other: &Self) -> Self;
    fn flow(&mut self, event: &Self::Event);
}

#[derive(Debug)]
pub struct Analysis<F> {
    ins: Vec<F>,
}

impl<F> Analysis<F> {
    pub fn in_at(&self, block: usize) -> &F {
        &self.ins[block]
    }
}

/// Solves a forward must problem. `events[b]` is the lowered body of block `b`
/// and the successors of a block with `barriers[b]` set start from the
/// boundary fact regardless of what flows out of it.
pub fn solve<F: DataflowFact>(graph: &Graph, events: &[Vec<F::Event>], barriers: &[bool]) -> Analysis<F> {
    let n = graph.len();
    let mut ins = vec![F::boundary(); n];
    // `None` is top
    let mut outs: Vec<Option<F>> = vec![None; n];

    // blocks the entry cannot reach never execute, flow the boundary through
    // them once so their successors have something to meet with
    let reachable = graph.reachable();
    for b in (0..n).filter(|b| !reachable[*b]) {
        let mut fact = F::boundary();
        for e in &events[b] {
            fact.flow(e);
        }
        outs[b] = Some(fact);
    }

    // popped from the back, so blocks are first visited in reverse postorder
    let mut worklist: Vec<usize> = graph.reverse_postorder();
    worklist.reverse();
    let mut queued = vec![false; n];
    for b in &worklist {
        queued[*b] = true;
    }

    let mut steps = 0;
    while let Some(b) = worklist.pop() {
        queued[b] = false;
        steps += 1;

        let preds = graph.preds(b);
        let inn = if b == ENTRY || preds.iter().any(|p| barriers[*p]) {
            F::boundary()
        } else {
            preds
                .iter()
                .filter_map(|p| outs[*p].as_ref())
                .fold(None, |acc: Option<F>, f| Some(match acc {
                    None => f.clone(),
                    Some(acc) => acc.meet(f),
                }))
                .unwrap_or_else(F::boundary)
        };

        let mut out = inn.clone();
        for e in &events[b] {
            out.flow(e);
        }
        ins[b] = inn;
        if outs[b].as_ref() != Some(&out) {
            outs[b] = Some(out);
            for &s in graph.succs(b) {
                if !queued[s] {
                    queued[s] = true;
                    worklist.push(s);
                }
            }
        }
    }
    trace!(target: "keycheck", "dataflow converged after {steps} steps over {n} blocks");

    Analysis { ins }
}
