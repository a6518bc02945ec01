//! Checks guarded pointers before they are passed to a call.
//!
//! Within a block, a guarded pointer `%v` loaded from slot `s` and then passed
//! to a call gets `call void @check(T* s)` placed right before that call. The
//! mapping from `%v` to `s` is dropped at a store to `s` and after any call,
//! since either may leave a different pointer in the slot.

use std::collections::{BTreeSet, HashMap, HashSet};

use internment::Arena;
use log::debug;

use crate::config::Config;
use crate::llvm::ast::{Block, Gid, GuardKind, Handle, Insn, Operand, Prog, Ty, Uid};
use crate::opt::CheckFns;

/// Returns the number of checks inserted
pub fn run<'a>(prog: &mut Prog<'a>, arena: &'a Arena<str>, config: &Config) -> usize {
    let mut names = Names::new(arena, prog);
    let mut wanted = BTreeSet::new();
    let mut inserted = 0;

    let ptr = prog.tables.intern_global(&config.checks.ptr);
    let array_ptr = prog.tables.intern_global(&config.checks.array_ptr);
    let checks = CheckFns { ptr: Some(ptr), array_ptr: Some(array_ptr) };

    let Prog { fdecls, tables, .. } = &mut *prog;
    for (gid, fdecl) in fdecls.iter_mut() {
        let before = inserted;
        for b in fdecl.cfg.block_iter_mut() {
            inserted += insert_block(b, &checks, &mut names, &mut wanted);
        }
        if inserted > before {
            debug!(target: "insert", "@{}: inserted {} checks", tables.global_name(*gid), inserted - before);
        }
    }

    for kind in wanted {
        let gid = match kind {
            GuardKind::Ptr => ptr,
            GuardKind::ArrayPtr => array_ptr,
        };
        declare_check(prog, gid, kind);
    }

    inserted
}

fn insert_block<'a>(
    b: &mut Block<'a>,
    checks: &CheckFns,
    names: &mut Names<'a>,
    wanted: &mut BTreeSet<GuardKind>,
) -> usize {
    // loaded value -> (slot type, slot)
    let mut loaded: HashMap<Uid<'a>, (Ty, Handle<'a>)> = HashMap::new();
    let mut out = Vec::with_capacity(b.insns.len());
    let mut inserted = 0;

    for (uid, insn) in b.insns.drain(..) {
        match &insn {
            Insn::Load(ty, slot) if ty.guard_kind().is_some() => {
                if let Some(h) = Handle::from_operand(*slot) {
                    loaded.insert(uid, (Ty::Ptr(Box::new(ty.clone())), h));
                }
            }
            Insn::Store(_, _, slot) => {
                if let Some(h) = Handle::from_operand(*slot) {
                    loaded.retain(|_, (_, s)| *s != h);
                }
            }
            Insn::Call(_, Operand::Gid(g), _) if checks.is_check(*g) => {}
            Insn::Call(_, _, args) => {
                let mut seen = HashSet::new();
                for (ty, arg) in args {
                    let (Some(kind), Operand::Id(v)) = (ty.guard_kind(), arg) else { continue };
                    let Some((slot_ty, slot)) = loaded.get(v) else { continue };
                    if !seen.insert(*slot) {
                        continue;
                    }
                    let callee = match kind {
                        GuardKind::Ptr => checks.ptr,
                        GuardKind::ArrayPtr => checks.array_ptr,
                    };
                    let Some(callee) = callee else { continue };
                    let check = Insn::Call(Ty::Void, Operand::Gid(callee), vec![(slot_ty.clone(), Operand::from(*slot))]);
                    out.push((names.fresh(), check));
                    wanted.insert(kind);
                    inserted += 1;
                }
                loaded.clear();
            }
            _ => {}
        }
        out.push((uid, insn));
    }

    b.insns = out;
    inserted
}

fn declare_check(prog: &mut Prog<'_>, gid: Gid, kind: GuardKind) {
    let declared = prog.fdecls.iter().any(|(g, _)| *g == gid) || prog.edecls.iter().any(|(g, _)| *g == gid);
    if declared {
        return;
    }
    let slot = Ty::Ptr(Box::new(Ty::Guarded(kind, Box::new(Ty::I8))));
    prog.edecls.push((gid, Ty::Fun(vec![slot], Box::new(Ty::Void))));
}

struct Names<'a> {
    arena: &'a Arena<str>,
    taken: HashSet<Uid<'a>>,
    next: usize,
}

impl<'a> Names<'a> {
    fn new(arena: &'a Arena<str>, prog: &Prog<'a>) -> Names<'a> {
        let taken = prog.fdecls
            .iter()
            .flat_map(|(_, f)| f.params.iter().copied().chain(f.cfg.block_iter().flat_map(|b| b.insns.iter().map(|(u, _)| *u))))
            .collect();
        Names { arena, taken, next: 0 }
    }

    fn fresh(&mut self) -> Uid<'a> {
        loop {
            let uid = self.arena.intern_string(format!("_keycheck__{}", self.next));
            self.next += 1;
            if self.taken.insert(uid) {
                return uid;
            }
        }
    }
}
