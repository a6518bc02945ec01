//! Redundant key check elimination.
//!
//! [`run`] drives the passes in order: optional check insertion, call graph
//! reachability, invalidation classification, block isolation and finally the
//! elimination of checks that an earlier check already covers.

use std::fmt;

use internment::Arena;
use log::info;

use crate::config::Config;
use crate::llvm::ast::{Gid, GuardKind, Handle, Insn, LookupTables, Operand, Prog, Uid};
use crate::llvm::callgraph::CallGraph;
use crate::llvm::cfg::UnknownLabel;

pub mod insert;
pub mod invalidation;
pub mod isolate;
pub mod keycheck;
pub mod reach;

pub use invalidation::{CallSite, Invalidation};
pub use isolate::Isolation;
pub use reach::ReachIndex;

#[derive(Debug, thiserror::Error)]
pub enum OptError {
    #[error("malformed key check %{uid}: {reason}")]
    MalformedCheck { uid: String, reason: &'static str },
    #[error("store %{0} writes through a null or constant pointer")]
    UnresolvedStore(String),
    #[error(transparent)]
    UnknownLabel(#[from] UnknownLabel),
}

/// The check functions present in a program
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckFns {
    pub ptr: Option<Gid>,
    pub array_ptr: Option<Gid>,
}

impl CheckFns {
    pub fn resolve(config: &Config, tables: &LookupTables) -> CheckFns {
        CheckFns {
            ptr: tables.global(&config.checks.ptr),
            array_ptr: tables.global(&config.checks.array_ptr),
        }
    }

    pub fn kind_of(&self, g: Gid) -> Option<GuardKind> {
        if self.ptr == Some(g) {
            Some(GuardKind::Ptr)
        } else if self.array_ptr == Some(g) {
            Some(GuardKind::ArrayPtr)
        } else {
            None
        }
    }

    pub fn is_check(&self, g: Gid) -> bool {
        self.kind_of(g).is_some()
    }

    /// The handle tested by `insn`, if it is a call to a check function
    pub fn checked_handle<'a>(&self, uid: Uid<'a>, insn: &Insn<'a>) -> Result<Option<Handle<'a>>, OptError> {
        let Insn::Call(_, Operand::Gid(g), args) = insn else {
            return Ok(None);
        };
        let Some(kind) = self.kind_of(*g) else {
            return Ok(None);
        };
        let malformed = |reason| OptError::MalformedCheck { uid: uid.to_string(), reason };
        let [(ty, op)] = args.as_slice() else {
            return Err(malformed("expected exactly one argument"));
        };
        if ty.slot_guard_kind() != Some(kind) {
            return Err(malformed("argument is not a slot of the checked pointer kind"));
        }
        Handle::from_operand(*op)
            .map(Some)
            .ok_or_else(|| malformed("argument is not a named location"))
    }
}

#[derive(Debug, Default)]
pub struct Report {
    /// checks added in front of calls
    pub inserted: usize,
    /// blocks created by isolating invalidating calls
    pub splits: usize,
    /// checks removed, per function
    pub removed: Vec<(String, usize)>,
    /// functions left untouched, and why
    pub skipped: Vec<(String, String)>,
}

impl Report {
    pub fn total_removed(&self) -> usize {
        self.removed.iter().map(|(_, n)| n).sum()
    }

    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.splits > 0 || self.total_removed() > 0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "inserted {} checks, split {} blocks", self.inserted, self.splits)?;
        for (name, n) in &self.removed {
            writeln!(f, "@{name}: removed {n} checks")?;
        }
        for (name, why) in &self.skipped {
            writeln!(f, "@{name}: skipped, {why}")?;
        }
        write!(f, "removed {} checks in total", self.total_removed())
    }
}

pub fn run<'a>(prog: &mut Prog<'a>, arena: &'a Arena<str>, config: &Config) -> Report {
    let mut report = Report::default();
    if config.insert_call_checks {
        report.inserted = insert::run(prog, arena, config);
    }

    let checks = CheckFns::resolve(config, &prog.tables);
    let cg = CallGraph::build(prog, |g| checks.is_check(g));
    let reach = ReachIndex::build(&cg);
    let inv = Invalidation::classify(prog, &cg, &reach, config);
    let iso = isolate::run(prog, &inv);
    report.splits = iso.splits;

    let stats = keycheck::run(prog, &checks, &inv, &iso);
    report.removed = stats.removed;
    report.skipped = stats.skipped;

    info!(
        target: "keycheck",
        "removed {} checks from {} functions ({} skipped)",
        report.total_removed(),
        report.removed.len(),
        report.skipped.len(),
    );
    report
}
