use std::collections::{BTreeSet, HashSet};

use log::debug;

use crate::config::Config;
use crate::llvm::ast::{Gid, Prog, Uid};
use crate::llvm::callgraph::{CallGraph, Callee};
use crate::opt::reach::ReachIndex;

/// A call instruction, named by the function it is in and its id there
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallSite<'a> {
    pub caller: Gid,
    pub uid: Uid<'a>,
}

/// Which calls may free memory and so invalidate every guarded pointer.
///
/// A call may invalidate when its callee is unknown, is an external procedure
/// missing from the whitelist, or is a procedure that can reach such a call.
/// Calls to the check functions never do.
#[derive(Debug, Default)]
pub struct Invalidation<'a> {
    sites: HashSet<CallSite<'a>>,
    procedures: BTreeSet<Gid>,
}

impl<'a> Invalidation<'a> {
    pub fn classify(prog: &Prog<'a>, cg: &CallGraph<'a>, reach: &ReachIndex, config: &Config) -> Invalidation<'a> {
        let tables = &prog.tables;
        let mut sites = HashSet::new();
        let mut direct = BTreeSet::new();

        for &caller in cg.nodes() {
            for e in cg.edges(caller) {
                let invalidates = match e.callee {
                    Callee::Indirect => true,
                    Callee::Direct(g) => !cg.has_body(g) && !config.is_whitelisted(tables.global_name(g)),
                };
                if invalidates {
                    sites.insert(CallSite { caller, uid: e.site });
                    direct.insert(caller);
                }
            }
        }

        let mut procedures = direct.clone();
        for &f in &direct {
            procedures.extend(reach.reached_by(f).iter().copied());
        }

        for &caller in cg.nodes() {
            for e in cg.edges(caller) {
                if let Callee::Direct(g) = e.callee {
                    if cg.has_body(g) && procedures.contains(&g) {
                        sites.insert(CallSite { caller, uid: e.site });
                    }
                }
            }
        }

        for &p in &procedures {
            let how = if direct.contains(&p) { "directly" } else { "transitively" };
            debug!(target: "invalidation", "@{} may invalidate {how}", tables.global_name(p));
        }
        debug!(
            target: "invalidation",
            "{} of {} procedures and {} call sites may invalidate",
            procedures.len(),
            cg.nodes().len(),
            sites.len(),
        );

        Invalidation { sites, procedures }
    }

    pub fn is_may_invalidate(&self, site: &CallSite<'a>) -> bool {
        self.sites.contains(site)
    }

    pub fn may_invalidate_sites(&self) -> impl Iterator<Item = &CallSite<'a>> {
        self.sites.iter()
    }

    pub fn invalidating_procedures(&self) -> &BTreeSet<Gid> {
        &self.procedures
    }

    pub fn is_invalidating(&self, p: Gid) -> bool {
        self.procedures.contains(&p)
    }
}
