//! Gives every invalidating call a block of its own.
//!
//! Afterwards each block holds at most one call that may invalidate, and when
//! it does the call is the only instruction of the block and the terminator is
//! an unconditional branch. The eliminator then treats the whole block as a
//! barrier.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::llvm::ast::{BlockId, Cfg, Gid, Insn, LookupTables, Prog, Terminator, Uid};
use crate::opt::invalidation::{CallSite, Invalidation};

#[derive(Debug, Default)]
pub struct Isolation {
    blocks: HashMap<Gid, BTreeSet<BlockId>>,
    /// number of blocks created
    pub splits: usize,
}

impl Isolation {
    /// The blocks of `f` that end in a call which may invalidate
    pub fn blocks(&self, f: Gid) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.get(&f).into_iter().flatten().copied()
    }

    pub fn is_may_invalidate(&self, f: Gid, b: BlockId) -> bool {
        self.blocks.get(&f).is_some_and(|bs| bs.contains(&b))
    }
}

pub fn run<'a>(prog: &mut Prog<'a>, inv: &Invalidation<'a>) -> Isolation {
    let Prog { fdecls, tables, .. } = prog;
    let mut iso = Isolation::default();

    for (gid, fdecl) in fdecls.iter_mut() {
        let caller = *gid;
        let before = iso.splits;
        let marked = isolate_cfg(&mut fdecl.cfg, tables, &mut iso.splits, |uid| {
            inv.is_may_invalidate(&CallSite { caller, uid })
        });
        debug!(
            target: "isolate",
            "@{}: {} invalidating blocks, {} splits",
            tables.global_name(caller),
            marked.len(),
            iso.splits - before,
        );
        if !marked.is_empty() {
            iso.blocks.insert(caller, marked);
        }
    }

    iso
}

fn isolate_cfg<'a>(
    cfg: &mut Cfg<'a>,
    tables: &mut LookupTables,
    splits: &mut usize,
    invalidates: impl Fn(Uid<'a>) -> bool,
) -> BTreeSet<BlockId> {
    let mut marked = BTreeSet::new();
    let mut split = |cfg: &mut Cfg<'a>, ix: usize, at: usize| {
        let base = tables.block_name(cfg.block_id(ix)).to_string();
        let lbl = tables.fresh_label(&base);
        cfg.split_block(ix, at, lbl);
        *splits += 1;
    };

    // splitting only inserts blocks after `ix`, so scanning forward visits
    // every original instruction exactly once
    let mut ix = 0;
    while ix < cfg.len() {
        let found = cfg.block(ix).insns.iter().position(|(uid, insn)| {
            matches!(insn, Insn::Call(..)) && invalidates(*uid)
        });
        let Some(pos) = found else {
            ix += 1;
            continue;
        };

        if pos > 0 {
            split(cfg, ix, pos);
            ix += 1;
        }
        let b = cfg.block(ix);
        if b.insns.len() > 1 || !matches!(b.term, Terminator::Br(_)) {
            split(cfg, ix, 1);
        }
        marked.insert(cfg.block_id(ix));
        ix += 1;
    }

    marked
}
