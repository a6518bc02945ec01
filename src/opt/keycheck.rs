//! Removal of key checks that an earlier check already covers.
//!
//! A check on handle `h` is redundant when every path to it passes a check on
//! `h` with no invalidating call and no store to `h` in between. Calls that
//! cannot invalidate may still write to memory, so a call to a procedure with
//! a body also forgets every global handle and every local handle whose
//! address escapes the function. Whitelisted externals forget nothing.

use std::collections::HashSet;

use log::{debug, warn};

use crate::llvm::ast::{Fdecl, Gid, Handle, Insn, LookupTables, Operand, Prog, Terminator, Uid};
use crate::llvm::cfg::Graph;
use crate::llvm::dataflow::validity::{Event, Fact};
use crate::llvm::dataflow::{self, DataflowFact};
use crate::opt::invalidation::{CallSite, Invalidation};
use crate::opt::isolate::Isolation;
use crate::opt::{CheckFns, OptError};

#[derive(Debug, Default)]
pub struct Stats {
    pub removed: Vec<(String, usize)>,
    pub skipped: Vec<(String, String)>,
}

pub fn run<'a>(prog: &mut Prog<'a>, checks: &CheckFns, inv: &Invalidation<'a>, iso: &Isolation) -> Stats {
    let Prog { fdecls, tables, .. } = prog;
    let tables = &*tables;
    let bodies: HashSet<Gid> = fdecls.iter().map(|(g, _)| *g).collect();
    let mut stats = Stats::default();

    for (gid, fdecl) in fdecls.iter_mut() {
        let name = tables.global_name(*gid).to_string();
        let ctx = Ctx { caller: *gid, tables, checks, inv, iso, bodies: &bodies };
        match ctx.redundant_checks(fdecl) {
            Ok(redundant) => {
                let mut removed = 0;
                for (b, dead) in fdecl.cfg.block_iter_mut().zip(&redundant) {
                    let mut ix = 0;
                    b.insns.retain(|_| {
                        ix += 1;
                        !dead.contains(&(ix - 1))
                    });
                    removed += dead.len();
                }
                debug!(target: "keycheck", "@{name}: removed {removed} checks");
                stats.removed.push((name, removed));
            }
            Err(e) => {
                warn!(target: "keycheck", "@{name}: leaving checks in place, {e}");
                stats.skipped.push((name, e.to_string()));
            }
        }
    }

    stats
}

struct Ctx<'c, 'a> {
    caller: Gid,
    tables: &'c LookupTables,
    checks: &'c CheckFns,
    inv: &'c Invalidation<'a>,
    iso: &'c Isolation,
    bodies: &'c HashSet<Gid>,
}

impl<'c, 'a> Ctx<'c, 'a> {
    /// Positions of the redundant checks in each block
    fn redundant_checks(&self, fdecl: &Fdecl<'a>) -> Result<Vec<HashSet<usize>>, OptError> {
        let cfg = &fdecl.cfg;
        let graph = Graph::from_cfg(cfg, self.tables)?;
        let escaped = escaped_locals(fdecl, self.checks);
        let events = cfg
            .block_iter()
            .map(|b| {
                b.insns
                    .iter()
                    .enumerate()
                    .map(|(ix, (uid, insn))| self.lower(ix, *uid, insn, &escaped))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|evs| evs.into_iter().flatten().collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let barriers: Vec<bool> = (0..cfg.len())
            .map(|ix| self.iso.is_may_invalidate(self.caller, cfg.block_id(ix)))
            .collect();

        let analysis = dataflow::solve::<Fact>(&graph, &events, &barriers);

        let redundant = events
            .iter()
            .enumerate()
            .map(|(b, evs)| {
                let mut fact = analysis.in_at(b).clone();
                let mut dead = HashSet::new();
                for e in evs {
                    if let Event::Check(ix, h) = e {
                        if fact.contains(h) {
                            dead.insert(*ix);
                        }
                    }
                    fact.flow(e);
                }
                dead
            })
            .collect();
        Ok(redundant)
    }

    fn lower(&self, ix: usize, uid: Uid<'a>, insn: &Insn<'a>, escaped: &HashSet<Uid<'a>>) -> Result<Vec<Event<'a>>, OptError> {
        if let Some(h) = self.checks.checked_handle(uid, insn)? {
            return Ok(vec![Event::Check(ix, h)]);
        }
        let events = match insn {
            Insn::Store(_, _, ptr) => {
                let h = Handle::from_operand(*ptr).ok_or_else(|| OptError::UnresolvedStore(uid.to_string()))?;
                vec![Event::Kill(h)]
            }
            Insn::Call(_, callee, _) => {
                if self.inv.is_may_invalidate(&CallSite { caller: self.caller, uid }) {
                    vec![Event::Invalidate]
                } else {
                    match callee {
                        Operand::Gid(g) if self.bodies.contains(g) => std::iter::once(Event::KillGlobals)
                            .chain(escaped.iter().map(|id| Event::Kill(Handle::Id(*id))))
                            .collect(),
                        _ => vec![],
                    }
                }
            }
            _ => vec![],
        };
        Ok(events)
    }
}

/// Locals whose value is used other than as a location to load from, store
/// to or check. Parameters always count as escaped.
fn escaped_locals<'a>(fdecl: &Fdecl<'a>, checks: &CheckFns) -> HashSet<Uid<'a>> {
    let mut escaped: HashSet<Uid<'a>> = fdecl.params.iter().copied().collect();
    let mut add = |o: &Operand<'a>| {
        if let Operand::Id(id) = o {
            escaped.insert(*id);
        }
    };

    for b in fdecl.cfg.block_iter() {
        for (_, insn) in &b.insns {
            match insn {
                Insn::Alloca(_) => {}
                Insn::Load(_, _) => {}
                Insn::Store(_, v, _) => add(v),
                Insn::Call(_, Operand::Gid(g), _) if checks.is_check(*g) => {}
                Insn::Call(_, callee, args) => {
                    add(callee);
                    args.iter().for_each(|(_, o)| add(o));
                }
                Insn::Binop(_, _, o1, o2) | Insn::Icmp(_, _, o1, o2) => {
                    add(o1);
                    add(o2);
                }
                Insn::Bitcast(_, o, _) => add(o),
                Insn::Gep(_, o, os) => {
                    add(o);
                    os.iter().for_each(&mut add);
                }
            }
        }
        match &b.term {
            Terminator::Ret(_, Some(o)) | Terminator::Cbr(o, _, _) => add(o),
            Terminator::Ret(_, None) | Terminator::Br(_) => {}
        }
    }

    escaped
}
