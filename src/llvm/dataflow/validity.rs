//! Which guarded pointer handles are known to hold a pointer whose key has
//! been checked since the last point it could have changed.

use std::collections::HashSet;

use crate::llvm::ast::Handle;
use crate::llvm::dataflow::DataflowFact;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event<'a> {
    /// the check at this position of its block tests the pointer held in the
    /// handle
    Check(usize, Handle<'a>),
    /// the handle may now hold a different pointer
    Kill(Handle<'a>),
    /// every global handle may now hold a different pointer
    KillGlobals,
    /// some allocation may have been freed
    Invalidate,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fact<'a>(pub HashSet<Handle<'a>>);

impl<'a> Fact<'a> {
    pub fn contains(&self, h: &Handle<'a>) -> bool {
        self.0.contains(h)
    }
}

impl<'a> DataflowFact for Fact<'a> {
    type Event = Event<'a>;

    fn boundary() -> Self {
        Fact(HashSet::new())
    }

    fn meet(&self, other: &Self) -> Self {
        Fact(self.0.intersection(&other.0).copied().collect())
    }

    fn flow(&mut self, event: &Event<'a>) {
        match event {
            Event::Check(_, h) => {
                self.0.insert(*h);
            }
            Event::Kill(h) => {
                self.0.remove(h);
            }
            Event::KillGlobals => self.0.retain(|h| !h.is_global()),
            Event::Invalidate => self.0.clear(),
        }
    }
}
