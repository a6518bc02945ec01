use super::ast::{Block, BlockId, Cfg, Gid, Lbl, LookupTables, Terminator};

// Blocks are addressed by a dense index: 0 is the entry block and `i + 1` is
// `blocks[i]`.
impl<'a> Cfg<'a> {
    pub fn block_iter(&self) -> impl Iterator<Item = &Block<'a>> {
        std::iter::once(&self.entry).chain(self.blocks.iter().map(|(_, b)| b))
    }

    pub fn block_iter_mut(&mut self) -> impl Iterator<Item = &mut Block<'a>> {
        std::iter::once(&mut self.entry).chain(self.blocks.iter_mut().map(|(_, b)| b))
    }

    pub fn len(&self) -> usize {
        self.blocks.len() + 1
    }

    /// Panics if `ix` is out of bounds, like slice indexing
    pub fn block(&self, ix: usize) -> &Block<'a> {
        match ix {
            0 => &self.entry,
            i => &self.blocks[i - 1].1,
        }
    }

    pub fn block_mut(&mut self, ix: usize) -> &mut Block<'a> {
        match ix {
            0 => &mut self.entry,
            i => &mut self.blocks[i - 1].1,
        }
    }

    pub fn block_id(&self, ix: usize) -> BlockId {
        match ix {
            0 => BlockId::Entry,
            i => BlockId::Lbl(self.blocks[i - 1].0),
        }
    }

    pub fn label_index(&self, lbl: Lbl) -> Option<usize> {
        self.blocks.iter().position(|(l, _)| *l == lbl).map(|i| i + 1)
    }

    /// Moves the instructions of block `ix` from position `at` onwards, along
    /// with its terminator, into a new block labelled `lbl` placed directly
    /// after it. The original block then branches to the new one.
    pub fn split_block(&mut self, ix: usize, at: usize, lbl: Lbl) {
        let b = self.block_mut(ix);
        let insns = b.insns.split_off(at);
        let term = std::mem::replace(&mut b.term, Terminator::Br(lbl));
        self.blocks.insert(ix, (lbl, Block { insns, term }));
    }
}

impl LookupTables {
    pub fn global(&self, name: &str) -> Option<Gid> {
        self.globals.iter().position(|g| **g == *name).map(|ix| Gid::from(ix as u32))
    }

    /// The global named `name`, adding the name if it is not known yet
    pub fn intern_global(&mut self, name: &str) -> Gid {
        self.global(name).unwrap_or_else(|| {
            self.globals.push(name.into());
            Gid::from(self.globals.len() as u32 - 1)
        })
    }

    /// Creates a label named `<base>.split<N>` for the smallest `N` not yet
    /// taken. Splitting `loop.split0` again gives `loop.split1`.
    pub fn fresh_label(&mut self, base: &str) -> Lbl {
        let base = match base.rsplit_once(".split") {
            Some((origin, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => origin,
            _ => base,
        };
        let mut n = 0usize;
        loop {
            let name = format!("{base}.split{n}");
            if !self.labels.iter().any(|l| **l == *name) {
                let lbl = Lbl::from(self.labels.len() as u32);
                self.labels.push(name.into_boxed_str());
                return lbl;
            }
            n += 1;
        }
    }
}
