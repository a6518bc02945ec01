use std::collections::{BTreeSet, HashMap, HashSet};

use super::ast::{Gid, Insn, Operand, Prog, Ty, Uid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Callee {
    Direct(Gid),
    /// the callee could not be resolved to a procedure
    Indirect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallEdge<'a> {
    pub site: Uid<'a>,
    pub callee: Callee,
}

/// Whole program call graph. Nodes are the procedures with bodies, in program
/// order, and every call instruction in them is an edge. Calls to check
/// functions are left out.
#[derive(Debug)]
pub struct CallGraph<'a> {
    nodes: Vec<Gid>,
    edges: HashMap<Gid, Vec<CallEdge<'a>>>,
    bodies: HashSet<Gid>,
}

impl<'a> CallGraph<'a> {
    pub fn build(prog: &Prog<'a>, is_check: impl Fn(Gid) -> bool) -> CallGraph<'a> {
        let bodies: HashSet<Gid> = prog.fdecls.iter().map(|(g, _)| *g).collect();
        let externals: HashSet<Gid> = prog.edecls
            .iter()
            .filter(|(_, t)| matches!(t, Ty::Fun(..)))
            .map(|(g, _)| *g)
            .collect();

        let mut nodes = Vec::with_capacity(prog.fdecls.len());
        let mut edges = HashMap::new();
        for (gid, fdecl) in &prog.fdecls {
            let mut out = Vec::new();
            for b in fdecl.cfg.block_iter() {
                for (uid, insn) in &b.insns {
                    let Insn::Call(_, callee, _) = insn else { continue };
                    let callee = match callee {
                        Operand::Gid(g) if is_check(*g) => continue,
                        Operand::Gid(g) if bodies.contains(g) || externals.contains(g) => Callee::Direct(*g),
                        _ => Callee::Indirect,
                    };
                    out.push(CallEdge { site: *uid, callee });
                }
            }
            nodes.push(*gid);
            edges.insert(*gid, out);
        }

        CallGraph { nodes, edges, bodies }
    }

    pub fn nodes(&self) -> &[Gid] {
        &self.nodes
    }

    pub fn edges(&self, caller: Gid) -> &[CallEdge<'a>] {
        self.edges.get(&caller).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_body(&self, g: Gid) -> bool {
        self.bodies.contains(&g)
    }

    pub fn has_indirect_calls(&self, caller: Gid) -> bool {
        self.edges(caller).iter().any(|e| e.callee == Callee::Indirect)
    }

    /// The distinct resolved callees of `caller`
    pub fn callees(&self, caller: Gid) -> BTreeSet<Gid> {
        self.edges(caller)
            .iter()
            .filter_map(|e| match e.callee {
                Callee::Direct(g) => Some(g),
                Callee::Indirect => None,
            })
            .collect()
    }
}
