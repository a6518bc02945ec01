use internment::ArenaIntern;

use std::collections::HashMap;
use std::convert::From;

pub type Uid<'arena> = ArenaIntern<'arena, str>;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Gid(u32);

impl Gid {
    pub fn ix(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Gid {
    fn from(value: u32) -> Self {
        Gid(value)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Tid(u32);

impl Tid {
    pub fn ix(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Tid {
    fn from(value: u32) -> Self {
        Tid(value)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Lbl(u32);

impl Lbl {
    pub fn ix(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Lbl {
    fn from(value: u32) -> Self {
        Lbl(value)
    }
}

/// Names a block of a function, the entry block has no label
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockId {
    Entry,
    Lbl(Lbl),
}

/// The two flavours of temporally safe pointer
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum GuardKind {
    /// `T mmptr`, a pointer to a single object
    Ptr,
    /// `T mmarrayptr`, a pointer into an array object
    ArrayPtr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Ty {
    Void,
    I1,
    I8,
    I64,
    Ptr(Box<Ty>),
    /// a pointer carrying out of band key metadata, checked before use
    Guarded(GuardKind, Box<Ty>),
    Struct(Vec<Ty>),
    Array(i64, Box<Ty>),
    // strange redundancy with `FunTy` to avoid extra boxing
    Fun(Vec<Ty>, Box<Ty>),
    Named(Tid),
}

impl Ty {
    pub fn guard_kind(&self) -> Option<GuardKind> {
        match self {
            Ty::Guarded(kind, _) => Some(*kind),
            _ => None,
        }
    }

    /// The guard kind of a storage slot for a guarded pointer, e.g. `i64 mmptr*`
    pub fn slot_guard_kind(&self) -> Option<GuardKind> {
        match self {
            Ty::Ptr(t) => t.guard_kind(),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FunTy {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operand<'arena> {
    Null,
    Const(i64),
    Gid(Gid),
    Id(Uid<'arena>),
}

/// A storage location holding a guarded pointer.
///
/// Identity is syntactic: two different operands naming aliasing locations are
/// distinct handles.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Handle<'arena> {
    Id(Uid<'arena>),
    Gid(Gid),
}

impl<'a> Handle<'a> {
    pub fn from_operand(o: Operand<'a>) -> Option<Self> {
        match o {
            Operand::Id(id) => Some(Handle::Id(id)),
            Operand::Gid(gid) => Some(Handle::Gid(gid)),
            Operand::Null | Operand::Const(_) => None,
        }
    }

    pub fn is_global(self) -> bool {
        matches!(self, Handle::Gid(_))
    }
}

impl<'a> From<Handle<'a>> for Operand<'a> {
    fn from(h: Handle<'a>) -> Self {
        match h {
            Handle::Id(id) => Operand::Id(id),
            Handle::Gid(gid) => Operand::Gid(gid),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Bop {
    Add,
    Sub,
    Mul,
    Shl,
    Lshr,
    Ashr,
    And,
    Or,
    Xor,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cnd {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl Bop {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Bop::Add => "add",
            Bop::Sub => "sub",
            Bop::Mul => "mul",
            Bop::Shl => "shl",
            Bop::Lshr => "lshr",
            Bop::Ashr => "ashr",
            Bop::And => "and",
            Bop::Or => "or",
            Bop::Xor => "xor",
        }
    }
}

impl Cnd {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Cnd::Eq => "eq",
            Cnd::Ne => "ne",
            Cnd::Slt => "slt",
            Cnd::Sle => "sle",
            Cnd::Sgt => "sgt",
            Cnd::Sge => "sge",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Insn<'a> {
    Binop(Bop, Ty, Operand<'a>, Operand<'a>),
    Alloca(Ty),
    /// the type of the loaded value and then the operand to load from
    Load(Ty, Operand<'a>),
    /// the type of the stored value, the value operand to store, and the location to store to
    Store(Ty, Operand<'a>, Operand<'a>),
    Icmp(Cnd, Ty, Operand<'a>, Operand<'a>),
    /// return type, callee and typed arguments
    Call(Ty, Operand<'a>, Vec<(Ty, Operand<'a>)>),
    Bitcast(Ty, Operand<'a>, Ty),
    /// the type pointed to, the value to index from, and the index values
    Gep(Ty, Operand<'a>, Vec<Operand<'a>>),
}

#[derive(Debug, PartialEq)]
pub enum Terminator<'a> {
    /// return type and optional return value
    /// required if the return type is not void
    Ret(Ty, Option<Operand<'a>>),
    /// label to branch to
    Br(Lbl),
    /// the operand to branch on and then the true and false labels
    Cbr(Operand<'a>, Lbl, Lbl),
}

impl<'a> Terminator<'a> {
    pub fn successors(&self) -> Vec<Lbl> {
        match self {
            Terminator::Ret(..) => vec![],
            Terminator::Br(l) => vec![*l],
            Terminator::Cbr(_, l1, l2) => vec![*l1, *l2],
        }
    }
}

#[derive(Debug)]
pub struct Block<'a> {
    pub insns: Vec<(Uid<'a>, Insn<'a>)>,
    pub term: Terminator<'a>,
}

#[derive(Debug)]
pub struct Cfg<'a> {
    pub entry: Block<'a>,
    pub blocks: Vec<(Lbl, Block<'a>)>,
}

#[derive(Debug)]
pub struct Fdecl<'a> {
    pub ty: FunTy,
    pub params: Vec<Uid<'a>>,
    pub cfg: Cfg<'a>,
}

#[derive(Clone, Debug)]
pub enum Ginit {
    Null,
    Gid(Gid),
    Int(i64),
    String(String),
    Array(Vec<(Ty, Ginit)>),
    Struct(Vec<(Ty, Ginit)>),
    Bitcast(Ty, Box<Ginit>, Ty),
}

pub type Gdecl = (Ty, Ginit);

#[derive(Debug, Default)]
pub struct LookupTables {
    pub labels: Vec<Box<str>>,
    pub types: Vec<Box<str>>,
    pub globals: Vec<Box<str>>,
}

#[derive(Debug, Default)]
pub struct Prog<'a> {
    pub tdecls: HashMap<Tid, Ty>,
    pub gdecls: Vec<(Gid, Gdecl)>,
    pub fdecls: Vec<(Gid, Fdecl<'a>)>,
    pub edecls: Vec<(Gid, Ty)>,
    pub tables: LookupTables,
}
