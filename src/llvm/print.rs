use super::ast::*;
use std::fmt;
use std::io;

pub fn write<W: io::Write>(mut w: W, prog: &Prog) -> io::Result<()> {
    write!(w, "{prog}")?;
    w.flush()
}

/// Pairs an AST node with the tables needed to print the names it refers to
pub struct Print<'t, T: ?Sized>(pub &'t LookupTables, pub &'t T);

fn write_separated<T, W>(f: &mut W, sep: &str, ts: impl IntoIterator<Item = T>) -> fmt::Result
    where T: fmt::Display,
          W: fmt::Write,
{
    let mut first = true;
    for t in ts {
        if first {
            write!(f, "{t}")?
        } else {
            write!(f, "{sep}{t}")?
        }
        first = false;
    }
    Ok(())
}

impl LookupTables {
    pub fn global_name(&self, gid: Gid) -> &str {
        self.globals.get(gid.ix()).map(|s| &**s).unwrap_or("<unknown global>")
    }

    pub fn label_name(&self, lbl: Lbl) -> &str {
        self.labels.get(lbl.ix()).map(|s| &**s).unwrap_or("<unknown label>")
    }

    pub fn type_name(&self, tid: Tid) -> &str {
        self.types.get(tid.ix()).map(|s| &**s).unwrap_or("<unknown type>")
    }

    pub fn block_name(&self, b: BlockId) -> &str {
        match b {
            BlockId::Entry => "entry",
            BlockId::Lbl(l) => self.label_name(l),
        }
    }
}

// This is to avoid allocating when printing pointers to types that we
// create. E.g. load stores the pointee not pointer and we must create it.
struct Ptr<T>(T);

impl<T: fmt::Display> fmt::Display for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.0)
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardKind::Ptr => write!(f, "mmptr"),
            GuardKind::ArrayPtr => write!(f, "mmarrayptr"),
        }
    }
}

impl fmt::Display for Print<'_, Ty> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.0;
        match self.1 {
            Ty::Void => write!(f, "void"),
            Ty::I1 => write!(f, "i1"),
            Ty::I8 => write!(f, "i8"),
            Ty::I64 => write!(f, "i64"),
            Ty::Ptr(t) => write!(f, "{}", Ptr(Print(tables, &**t))),
            Ty::Guarded(k, t) => write!(f, "{} {k}", Print(tables, &**t)),
            Ty::Struct(ts) => {
                write!(f, "{{ ")?;
                write_separated(f, ", ", ts.iter().map(|t| Print(tables, t)))?;
                write!(f, " }}")
            }
            Ty::Array(n, t) => write!(f, "[{n} x {}]", Print(tables, &**t)),
            Ty::Fun(ts, t) => {
                write!(f, "{} (", Print(tables, &**t))?;
                write_separated(f, ", ", ts.iter().map(|t| Print(tables, t)))?;
                write!(f, ")")
            }
            Ty::Named(name) => write!(f, "%{}", tables.type_name(*name)),
        }
    }
}

impl<'a> fmt::Display for Print<'_, Operand<'a>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Operand::Null => write!(f, "null"),
            Operand::Const(x) => write!(f, "{x}"),
            Operand::Gid(g) => write!(f, "@{}", self.0.global_name(*g)),
            Operand::Id(u) => write!(f, "%{u}"),
        }
    }
}

impl<'a> fmt::Display for Print<'_, Handle<'a>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Print(self.0, &Operand::from(*self.1)))
    }
}

impl fmt::Display for Bop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl fmt::Display for Cnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl<'a> fmt::Display for Print<'_, Insn<'a>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.0;
        let ty = |t| Print(tables, t);
        let op = |o| Print(tables, o);
        match self.1 {
            Insn::Binop(b, t, o1, o2) => write!(f, "{b} {} {}, {}", ty(t), op(o1), op(o2)),
            Insn::Alloca(t) => write!(f, "alloca {}", ty(t)),
            Insn::Load(t, o) => write!(f, "load {}, {} {}", ty(t), Ptr(ty(t)), op(o)),
            Insn::Store(t, os, od) => write!(f, "store {} {}, {} {}", ty(t), op(os), Ptr(ty(t)), op(od)),
            Insn::Icmp(c, t, o1, o2) => write!(f, "icmp {c} {} {}, {}", ty(t), op(o1), op(o2)),
            Insn::Call(t, o, oa) => {
                write!(f, "call {} {}(", ty(t), op(o))?;
                write_separated(f, ", ", oa.iter().map(|(t, o)| format!("{} {}", ty(t), op(o))))?;
                write!(f, ")")
            }
            Insn::Bitcast(t1, o, t2) => write!(f, "bitcast {} {} to {}", ty(t1), op(o), ty(t2)),
            Insn::Gep(t, o, oi) => {
                write!(f, "getelementptr {}, {} {}", ty(t), Ptr(ty(t)), op(o))?;
                for o in oi {
                    match o {
                        Operand::Const(i) => write!(f, ", i32 {i}")?,
                        o => write!(f, ", i64 {}", op(o))?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl<'a> fmt::Display for Print<'_, Terminator<'a>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.0;
        match self.1 {
            Terminator::Ret(_, None) => write!(f, "ret void"),
            Terminator::Ret(t, Some(o)) => write!(f, "ret {} {}", Print(tables, t), Print(tables, o)),
            Terminator::Br(l) => write!(f, "br label %{}", tables.label_name(*l)),
            Terminator::Cbr(o, l, m) => write!(
                f,
                "br i1 {}, label %{}, label %{}",
                Print(tables, o),
                tables.label_name(*l),
                tables.label_name(*m),
            ),
        }
    }
}

impl<'a> fmt::Display for Print<'_, Block<'a>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (u, i) in &self.1.insns {
            match i {
                Insn::Store(_, _, _) | Insn::Call(Ty::Void, _, _) => write!(f, "\t")?,
                _ => write!(f, "\t%{u} = ")?,
            }
            writeln!(f, "{}", Print(self.0, i))?;
        }
        write!(f, "\t{}", Print(self.0, &self.1.term))
    }
}

impl<'a> fmt::Display for Print<'_, Cfg<'a>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", Print(self.0, &self.1.entry))?;
        for (label, b) in &self.1.blocks {
            writeln!(f, "{}:", self.0.label_name(*label))?;
            writeln!(f, "{}", Print(self.0, b))?;
        }
        Ok(())
    }
}

impl fmt::Display for Print<'_, Ginit> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.0;
        let typed = |gis: &[(Ty, Ginit)]| {
            gis.iter()
                .map(|(t, g)| format!("{} {}", Print(tables, t), Print(tables, g)))
                .collect::<Vec<_>>()
        };
        match self.1 {
            Ginit::Null => write!(f, "null"),
            Ginit::Gid(g) => write!(f, "@{}", tables.global_name(*g)),
            Ginit::Int(i) => write!(f, "{i}"),
            Ginit::String(s) => write!(f, "c\"{}\\00\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Ginit::Array(gis) => {
                write!(f, "[")?;
                write_separated(f, ", ", typed(gis))?;
                write!(f, "]")
            }
            Ginit::Struct(gis) => {
                write!(f, "{{")?;
                write_separated(f, ", ", typed(gis))?;
                write!(f, "}}")
            }
            Ginit::Bitcast(t1, g, t2) => write!(
                f,
                "bitcast ({} {} to {})",
                Print(tables, t1),
                Print(tables, &**g),
                Print(tables, t2),
            ),
        }
    }
}

impl<'a> fmt::Display for Prog<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = &self.tables;
        let mut tdecls: Vec<_> = self.tdecls.iter().collect();
        tdecls.sort_by_key(|(tid, _)| **tid);
        for (u, t) in &tdecls {
            writeln!(f, "%{} = type {}", tables.type_name(**u), Print(tables, *t))?
        }
        if !self.tdecls.is_empty() {
            writeln!(f)?;
        }

        for (gid, (ty, init)) in &self.gdecls {
            writeln!(f, "@{} = global {} {}", tables.global_name(*gid), Print(tables, ty), Print(tables, init))?;
        }
        if !self.gdecls.is_empty() {
            writeln!(f)?;
        }

        for (g, t) in &self.edecls {
            match t {
                Ty::Fun(ts, rt) => {
                    write!(f, "declare {} @{}(", Print(tables, &**rt), tables.global_name(*g))?;
                    write_separated(f, ", ", ts.iter().map(|t| Print(tables, t)))?;
                    writeln!(f, ")")?;
                }
                _ => writeln!(f, "@{} = external global {}", tables.global_name(*g), Print(tables, t))?,
            }
        }
        if !self.edecls.is_empty() {
            writeln!(f)?;
        }

        for (u, fd) in &self.fdecls {
            write!(f, "define {} @{}(", Print(tables, &fd.ty.ret), tables.global_name(*u))?;
            let params = fd.ty.params.iter().zip(&fd.params).map(|(t, p)| format!("{} %{p}", Print(tables, t)));
            write_separated(f, ", ", params)?;
            write!(f, ") {{\n{}}}\n", Print(tables, &fd.cfg))?;
        }

        Ok(())
    }
}
