//! Transitive call reachability between procedures.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;

use crate::llvm::ast::Gid;
use crate::llvm::callgraph::CallGraph;

static EMPTY: BTreeSet<Gid> = BTreeSet::new();

/// `reaches[p]` holds every procedure a call to `p` may end up calling,
/// `reached_by` is its inverse. A procedure only reaches itself through a
/// cycle of calls. Procedures without bodies are reachable but reach nothing.
#[derive(Debug, Default)]
pub struct ReachIndex {
    reaches: HashMap<Gid, BTreeSet<Gid>>,
    reached_by: HashMap<Gid, BTreeSet<Gid>>,
}

impl ReachIndex {
    pub fn build(cg: &CallGraph) -> ReachIndex {
        let mut index = ReachIndex::default();
        let mut visited = HashSet::new();
        let mut edges = 0;

        // popped in program order
        let mut worklist: Vec<Gid> = cg.nodes().iter().rev().copied().collect();
        while let Some(f) = worklist.pop() {
            if !visited.insert(f) {
                continue;
            }
            for c in cg.callees(f) {
                index.add_edge(f, c);
                edges += 1;
                if cg.has_body(c) && !visited.contains(&c) {
                    worklist.push(c);
                }
            }
        }

        debug!(
            target: "reach",
            "closed {edges} call edges over {} procedures",
            visited.len(),
        );
        index
    }

    // Keeps the relation closed: everything that reaches `f` (and `f`) now
    // reaches everything `c` reaches (and `c`).
    fn add_edge(&mut self, f: Gid, c: Gid) {
        if self.can_reach(f, c) {
            return;
        }
        let mut sources: Vec<Gid> = self.reached_by(f).iter().copied().collect();
        sources.push(f);
        let mut targets: Vec<Gid> = self.reaches(c).iter().copied().collect();
        targets.push(c);

        for &s in &sources {
            self.reaches.entry(s).or_default().extend(targets.iter().copied());
        }
        for &t in &targets {
            self.reached_by.entry(t).or_default().extend(sources.iter().copied());
        }
    }

    pub fn reaches(&self, p: Gid) -> &BTreeSet<Gid> {
        self.reaches.get(&p).unwrap_or(&EMPTY)
    }

    pub fn reached_by(&self, p: Gid) -> &BTreeSet<Gid> {
        self.reached_by.get(&p).unwrap_or(&EMPTY)
    }

    pub fn can_reach(&self, from: Gid, to: Gid) -> bool {
        self.reaches(from).contains(&to)
    }
}
