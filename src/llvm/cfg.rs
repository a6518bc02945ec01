//! Index based view of a function's control flow graph.
//!
//! Nodes use the dense block numbering of [`Cfg`]: `0` is the entry block and
//! `i + 1` is `cfg.blocks[i]`.

use std::collections::HashMap;

use super::ast::{Cfg, Lbl, LookupTables};

pub const ENTRY: usize = 0;

#[derive(Debug, thiserror::Error)]
#[error("branch to unknown label %{0}")]
pub struct UnknownLabel(pub String);

#[derive(Debug)]
pub struct Graph {
    succs: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
}

impl Graph {
    pub fn from_cfg(cfg: &Cfg, tables: &LookupTables) -> Result<Graph, UnknownLabel> {
        let index: HashMap<Lbl, usize> = cfg.blocks.iter().enumerate().map(|(i, (l, _))| (*l, i + 1)).collect();
        let n = cfg.len();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for (from, b) in cfg.block_iter().enumerate() {
            for l in b.term.successors() {
                let Some(&to) = index.get(&l) else {
                    return Err(UnknownLabel(tables.label_name(l).to_string()));
                };
                // `br i1 %c, label %a, label %a` is a single edge
                if !succs[from].contains(&to) {
                    succs[from].push(to);
                    preds[to].push(from);
                }
            }
        }
        Ok(Graph { succs, preds })
    }

    pub fn len(&self) -> usize {
        self.succs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }

    pub fn succs(&self, n: usize) -> &[usize] {
        &self.succs[n]
    }

    pub fn preds(&self, n: usize) -> &[usize] {
        &self.preds[n]
    }

    /// Blocks reachable from the entry, in reverse postorder
    pub fn reverse_postorder(&self) -> Vec<usize> {
        let mut visited = vec![false; self.len()];
        let mut post = Vec::with_capacity(self.len());
        // (node, index of the next successor to visit)
        let mut stack = vec![(ENTRY, 0)];
        visited[ENTRY] = true;
        while let Some((n, next)) = stack.last_mut() {
            let n = *n;
            if let Some(&s) = self.succs[n].get(*next) {
                *next += 1;
                if !visited[s] {
                    visited[s] = true;
                    stack.push((s, 0));
                }
            } else {
                post.push(n);
                stack.pop();
            }
        }
        post.reverse();
        post
    }

    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        for n in self.reverse_postorder() {
            seen[n] = true;
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use internment::Arena;

    use super::*;
    use crate::llvm::parse;

    const SRC: &str = "define void @f(i1 %c) {
  br i1 %c, label %a, label %a
dead:
  br label %b
a:
  br label %b
b:
  br i1 %c, label %a, label %out
out:
  ret void
}";

    #[test]
    fn edges_and_order() {
        let arena = Arena::new();
        let prog = parse(SRC, &arena).unwrap();
        let cfg = &prog.fdecls[0].1.cfg;
        let g = Graph::from_cfg(cfg, &prog.tables).unwrap();

        // entry, dead, a, b, out
        assert_eq!(g.succs(ENTRY), &[2]);
        assert_eq!(g.preds(3), &[1, 2]);
        assert_eq!(g.preds(2), &[0, 3]);
        assert_eq!(g.reverse_postorder(), vec![0, 2, 3, 4]);
        assert_eq!(g.reachable(), vec![true, false, true, true, true]);
    }

    #[test]
    fn unknown_label() {
        let arena = Arena::new();
        let prog = parse("define void @f() {\n  br label %nowhere\n}", &arena).unwrap();
        let err = Graph::from_cfg(&prog.fdecls[0].1.cfg, &prog.tables).unwrap_err();
        assert_eq!(err.to_string(), "branch to unknown label %nowhere");
    }
}
