use std::collections::HashSet;

use internment::Arena;

use super::ast::*;
use super::lexer::{lex, LexerError, Token, TokenKind};
use crate::StrInterner;

#[derive(Clone, Debug, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(String);

impl From<LexerError> for ParseError {
    fn from(e: LexerError) -> Self {
        ParseError(format!("lexer error at {e}"))
    }
}

type ParseResult<T> = Result<T, ParseError>;

fn error_at(t: &Token, msg: impl std::fmt::Display) -> ParseError {
    ParseError(format!("{}: {msg}", t.loc))
}

pub fn parse<'a>(input: &str, arena: &'a Arena<str>) -> Result<Prog<'a>, ParseError> {
    let tokens = lex(input)?;
    Parser::new(tokens, input, arena).program()
}

struct Parser<'a, 'i> {
    tokens: Vec<Token>,
    next_token: usize,
    input: &'i str,
    arena: &'a Arena<str>,
    /// counter for the names of instructions that bind no uid
    fresh: usize,
    /// every `%name` in the input, fresh names avoid these
    written: HashSet<&'i str>,
    /// uids bound so far in the current function
    defined: HashSet<Uid<'a>>,
    labels: StrInterner,
    types: StrInterner,
    globals: StrInterner,
}

impl<'a, 'i> Parser<'a, 'i> {
    fn new(tokens: Vec<Token>, input: &'i str, arena: &'a Arena<str>) -> Self {
        let written = tokens.iter().filter(|t| t.kind == TokenKind::Uid).map(|t| t.get_id(input)).collect();
        Self {
            tokens,
            next_token: 0,
            input,
            arena,
            fresh: 0,
            written,
            defined: HashSet::new(),
            labels: StrInterner::default(),
            types: StrInterner::default(),
            globals: StrInterner::default(),
        }
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek_kind_at(0)
    }

    fn peek_kind_at(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.next_token + n).map(|t| t.kind)
    }

    fn test_next_is(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    /// An error located at the next token
    fn error(&self, msg: impl std::fmt::Display) -> ParseError {
        match self.tokens.get(self.next_token) {
            Some(t) => error_at(t, msg),
            None => ParseError(format!("end of input: {msg}")),
        }
    }

    fn consume(&mut self) -> ParseResult<Token> {
        let t = self.tokens.get(self.next_token).cloned().ok_or_else(|| self.error("unexpected end of input"))?;
        self.next_token += 1;
        Ok(t)
    }

    /// Skips the next token if it is a `kind`
    fn eat(&mut self, kind: TokenKind) -> bool {
        let found = self.test_next_is(kind);
        if found {
            self.next_token += 1;
        }
        found
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        match self.peek_kind() {
            Some(k) if k == kind => self.consume(),
            Some(k) => Err(self.error(format!("expected {kind:?}, found {k:?}"))),
            None => Err(self.error(format!("expected {kind:?}"))),
        }
    }

    /// Comma separated items up to and including `end`
    fn parse_separated<T>(&mut self, end: TokenKind, mut item: impl FnMut(&mut Self) -> ParseResult<T>) -> ParseResult<Vec<T>> {
        let mut items = Vec::new();
        while !self.test_next_is(end) {
            items.push(item(self)?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(end)?;
        Ok(items)
    }

    fn gensym(&mut self, s: &str) -> Uid<'a> {
        loop {
            let sym = format!("_{s}__{}", self.fresh);
            self.fresh += 1;
            if !self.written.contains(sym.as_str()) {
                return self.arena.intern_string(sym);
            }
        }
    }

    /// Binds the uid named by `t` in the current function
    fn define(&mut self, t: &Token) -> ParseResult<Uid<'a>> {
        let uid = self.uid(t);
        if !self.defined.insert(uid) {
            return Err(error_at(t, format!("%{uid} is defined more than once")));
        }
        Ok(uid)
    }

    fn uid(&self, t: &Token) -> Uid<'a> {
        self.arena.intern(t.get_id(self.input))
    }

    fn label(&mut self, t: &Token) -> Lbl {
        self.labels.intern(t.get_id(self.input)).into()
    }

    fn global(&mut self, t: &Token) -> Gid {
        self.globals.intern(t.get_id(self.input)).into()
    }

    fn named_type(&mut self, t: &Token) -> Tid {
        self.types.intern(t.get_id(self.input)).into()
    }

    fn program(mut self) -> ParseResult<Prog<'a>> {
        let mut prog = Prog::default();
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::Define => prog.fdecls.push(self.fdecl()?),
                TokenKind::Declare => prog.edecls.push(self.edecl()?),
                TokenKind::Uid => {
                    let (tid, ty) = self.tdecl()?;
                    prog.tdecls.insert(tid, ty);
                }
                TokenKind::Gid => {
                    let name = self.consume()?;
                    let gid = self.global(&name);
                    self.expect(TokenKind::Equals)?;
                    let external = self.eat(TokenKind::External);
                    self.expect(TokenKind::Global)?;
                    let ty = self.tipe()?;
                    if external {
                        prog.edecls.push((gid, ty));
                    } else {
                        let init = self.ginit()?;
                        prog.gdecls.push((gid, (ty, init)));
                    }
                }
                k => return Err(self.error(format!("unexpected {k:?} at top level"))),
            }
        }

        prog.tables = LookupTables {
            labels: self.labels.complete(),
            types: self.types.complete(),
            globals: self.globals.complete(),
        };
        Ok(prog)
    }

    fn tdecl(&mut self) -> ParseResult<(Tid, Ty)> {
        let name = self.expect(TokenKind::Uid)?;
        self.expect(TokenKind::Equals)?;
        self.expect(TokenKind::Type)?;
        let tid = self.named_type(&name);
        Ok((tid, self.tipe()?))
    }

    fn edecl(&mut self) -> ParseResult<(Gid, Ty)> {
        self.expect(TokenKind::Declare)?;
        let ret = self.tipe()?;
        let name = self.expect(TokenKind::Gid)?;
        let gid = self.global(&name);
        self.expect(TokenKind::LParen)?;
        let params = self.parse_separated(TokenKind::RParen, Self::tipe)?;
        Ok((gid, Ty::Fun(params, Box::new(ret))))
    }

    fn fdecl(&mut self) -> ParseResult<(Gid, Fdecl<'a>)> {
        self.expect(TokenKind::Define)?;
        let ret = self.tipe()?;
        let name = self.expect(TokenKind::Gid)?;
        let gid = self.global(&name);
        self.expect(TokenKind::LParen)?;
        self.defined.clear();
        let params = self.parse_separated(TokenKind::RParen, |p| {
            let ty = p.tipe()?;
            let param = p.expect(TokenKind::Uid)?;
            Ok((ty, p.define(&param)?))
        })?;
        self.expect(TokenKind::LBrace)?;

        if self.test_next_is(TokenKind::Entry) && self.peek_kind_at(1) == Some(TokenKind::Colon) {
            self.next_token += 2;
        }
        let entry = self.block()?;
        let mut blocks = Vec::new();
        while self.test_next_is(TokenKind::Lbl) {
            let lbl = self.consume()?;
            let lbl = self.label(&lbl);
            self.expect(TokenKind::Colon)?;
            blocks.push((lbl, self.block()?));
        }
        self.expect(TokenKind::RBrace)?;

        let (ptys, pnames) = params.into_iter().unzip();
        let fdecl = Fdecl {
            ty: FunTy { params: ptys, ret },
            params: pnames,
            cfg: Cfg { entry, blocks },
        };
        Ok((gid, fdecl))
    }

    fn block(&mut self) -> ParseResult<Block<'a>> {
        let mut insns = Vec::new();
        while matches!(self.peek_kind(), Some(TokenKind::Uid | TokenKind::Store | TokenKind::Call)) {
            insns.push(self.insn()?);
        }
        let term = self.terminator()?;
        Ok(Block { insns, term })
    }

    fn insn(&mut self) -> ParseResult<(Uid<'a>, Insn<'a>)> {
        if self.eat(TokenKind::Store) {
            let ty = self.tipe()?;
            let value = self.operand()?;
            self.expect(TokenKind::Comma)?;
            let _slot_ty = self.tipe()?;
            let slot = self.operand()?;
            return Ok((self.gensym("store"), Insn::Store(ty, value, slot)));
        }
        if self.eat(TokenKind::Call) {
            let uid = self.gensym("call");
            return Ok((uid, self.call()?));
        }

        let name = self.expect(TokenKind::Uid)?;
        let uid = self.define(&name)?;
        self.expect(TokenKind::Equals)?;
        let op = self.consume()?;
        let insn = match op.kind {
            TokenKind::Add => self.binop(Bop::Add)?,
            TokenKind::Sub => self.binop(Bop::Sub)?,
            TokenKind::Mul => self.binop(Bop::Mul)?,
            TokenKind::Shl => self.binop(Bop::Shl)?,
            TokenKind::Lshr => self.binop(Bop::Lshr)?,
            TokenKind::Ashr => self.binop(Bop::Ashr)?,
            TokenKind::And => self.binop(Bop::And)?,
            TokenKind::Or => self.binop(Bop::Or)?,
            TokenKind::Xor => self.binop(Bop::Xor)?,
            TokenKind::Alloca => Insn::Alloca(self.tipe()?),
            TokenKind::Load => {
                let ty = self.tipe()?;
                self.expect(TokenKind::Comma)?;
                let _ptr_ty = self.tipe()?;
                Insn::Load(ty, self.operand()?)
            }
            TokenKind::Icmp => {
                let t = self.consume()?;
                let cnd = match t.kind {
                    TokenKind::Eq => Cnd::Eq,
                    TokenKind::Ne => Cnd::Ne,
                    TokenKind::Slt => Cnd::Slt,
                    TokenKind::Sle => Cnd::Sle,
                    TokenKind::Sgt => Cnd::Sgt,
                    TokenKind::Sge => Cnd::Sge,
                    k => return Err(error_at(&t, format!("{k:?} is not an icmp condition"))),
                };
                let ty = self.tipe()?;
                let (lhs, rhs) = self.operand_pair()?;
                Insn::Icmp(cnd, ty, lhs, rhs)
            }
            TokenKind::Bitcast => {
                let from = self.tipe()?;
                let value = self.operand()?;
                self.expect(TokenKind::To)?;
                Insn::Bitcast(from, value, self.tipe()?)
            }
            TokenKind::Gep => self.gep()?,
            TokenKind::Call => self.call()?,
            k => return Err(error_at(&op, format!("{k:?} does not start an instruction"))),
        };
        Ok((uid, insn))
    }

    fn binop(&mut self, bop: Bop) -> ParseResult<Insn<'a>> {
        let ty = self.tipe()?;
        let (lhs, rhs) = self.operand_pair()?;
        Ok(Insn::Binop(bop, ty, lhs, rhs))
    }

    fn gep(&mut self) -> ParseResult<Insn<'a>> {
        let ty = self.tipe()?;
        self.expect(TokenKind::Comma)?;
        let _base_ty = self.tipe()?;
        let base = self.operand()?;
        let mut path = Vec::new();
        while self.eat(TokenKind::Comma) {
            if !self.eat(TokenKind::I32) {
                self.expect(TokenKind::I64)?;
            }
            path.push(self.operand()?);
        }
        Ok(Insn::Gep(ty, base, path))
    }

    fn call(&mut self) -> ParseResult<Insn<'a>> {
        let ret = self.tipe()?;
        let callee = self.operand()?;
        self.expect(TokenKind::LParen)?;
        let args = self.parse_separated(TokenKind::RParen, |p| Ok((p.tipe()?, p.operand()?)))?;
        Ok(Insn::Call(ret, callee, args))
    }

    fn terminator(&mut self) -> ParseResult<Terminator<'a>> {
        let t = self.consume()?;
        match t.kind {
            TokenKind::Ret => {
                let ty = self.tipe()?;
                let value = if ty == Ty::Void { None } else { Some(self.operand()?) };
                Ok(Terminator::Ret(ty, value))
            }
            TokenKind::Br if self.test_next_is(TokenKind::Label) => Ok(Terminator::Br(self.label_ref()?)),
            TokenKind::Br => {
                self.expect(TokenKind::I1)?;
                let cond = self.operand()?;
                self.expect(TokenKind::Comma)?;
                let then = self.label_ref()?;
                self.expect(TokenKind::Comma)?;
                let els = self.label_ref()?;
                Ok(Terminator::Cbr(cond, then, els))
            }
            k => Err(error_at(&t, format!("expected a terminator, found {k:?}"))),
        }
    }

    /// `label %name`
    fn label_ref(&mut self) -> ParseResult<Lbl> {
        self.expect(TokenKind::Label)?;
        let name = self.expect(TokenKind::Uid)?;
        Ok(self.label(&name))
    }

    fn tipe(&mut self) -> ParseResult<Ty> {
        let t = self.consume()?;
        let mut ty = match t.kind {
            TokenKind::Void => Ty::Void,
            TokenKind::I1 => Ty::I1,
            TokenKind::I8 => Ty::I8,
            TokenKind::I64 => Ty::I64,
            TokenKind::Uid => Ty::Named(self.named_type(&t)),
            TokenKind::LBrace => Ty::Struct(self.parse_separated(TokenKind::RBrace, Self::tipe)?),
            TokenKind::LBracket => {
                let len = self.expect(TokenKind::IntLit)?.get_int();
                self.expect(TokenKind::Cross)?;
                let elem = self.tipe()?;
                self.expect(TokenKind::RBracket)?;
                Ty::Array(len, Box::new(elem))
            }
            k => return Err(error_at(&t, format!("{k:?} does not start a type"))),
        };

        // postfix constructors bind left to right: `i64 mmptr*` is a slot
        loop {
            ty = match self.peek_kind() {
                Some(TokenKind::Star) => Ty::Ptr(Box::new(ty)),
                Some(TokenKind::MmPtr) => Ty::Guarded(GuardKind::Ptr, Box::new(ty)),
                Some(TokenKind::MmArrayPtr) => Ty::Guarded(GuardKind::ArrayPtr, Box::new(ty)),
                Some(TokenKind::LParen) => {
                    self.next_token += 1;
                    let params = self.parse_separated(TokenKind::RParen, Self::tipe)?;
                    ty = Ty::Fun(params, Box::new(ty));
                    continue;
                }
                _ => return Ok(ty),
            };
            self.next_token += 1;
        }
    }

    fn operand(&mut self) -> ParseResult<Operand<'a>> {
        let t = self.consume()?;
        match t.kind {
            TokenKind::Null => Ok(Operand::Null),
            TokenKind::IntLit => Ok(Operand::Const(t.get_int())),
            TokenKind::Uid => Ok(Operand::Id(self.uid(&t))),
            TokenKind::Gid => Ok(Operand::Gid(self.global(&t))),
            k => Err(error_at(&t, format!("expected an operand, found {k:?}"))),
        }
    }

    /// `a, b`
    fn operand_pair(&mut self) -> ParseResult<(Operand<'a>, Operand<'a>)> {
        let lhs = self.operand()?;
        self.expect(TokenKind::Comma)?;
        Ok((lhs, self.operand()?))
    }

    fn ginit(&mut self) -> ParseResult<Ginit> {
        let t = self.consume()?;
        let init = match t.kind {
            TokenKind::Null => Ginit::Null,
            TokenKind::IntLit => Ginit::Int(t.get_int()),
            TokenKind::StringLit => Ginit::String(t.get_string()),
            TokenKind::Gid => Ginit::Gid(self.global(&t)),
            TokenKind::LBracket => Ginit::Array(self.ginit_list(TokenKind::RBracket)?),
            TokenKind::LBrace => Ginit::Struct(self.ginit_list(TokenKind::RBrace)?),
            TokenKind::Bitcast => {
                self.expect(TokenKind::LParen)?;
                let from = self.tipe()?;
                let inner = self.ginit()?;
                self.expect(TokenKind::To)?;
                let to = self.tipe()?;
                self.expect(TokenKind::RParen)?;
                Ginit::Bitcast(from, Box::new(inner), to)
            }
            k => return Err(error_at(&t, format!("{k:?} does not start a global initializer"))),
        };
        Ok(init)
    }

    fn ginit_list(&mut self, end: TokenKind) -> ParseResult<Vec<(Ty, Ginit)>> {
        self.parse_separated(end, |p| Ok((p.tipe()?, p.ginit()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_types() {
        let arena = Arena::new();
        let prog = parse("@s = global i64 mmarrayptr* null\ndeclare void @f(i8 mmptr, i64 mmptr**)", &arena).unwrap();
        let slot = Ty::Ptr(Box::new(Ty::Guarded(GuardKind::ArrayPtr, Box::new(Ty::I64))));
        assert_eq!(prog.gdecls[0].1.0, slot);
        assert_eq!(slot.slot_guard_kind(), Some(GuardKind::ArrayPtr));

        let Ty::Fun(params, _) = &prog.edecls[0].1 else { panic!("not a function") };
        assert_eq!(params[0].guard_kind(), Some(GuardKind::Ptr));
        assert_eq!(params[1].slot_guard_kind(), None);
    }

    #[test]
    fn unnamed_instructions_get_fresh_uids() {
        let arena = Arena::new();
        let src = "define void @f() {\n  store i64 1, i64* @g\n  call void @f()\n  ret void\n}";
        let prog = parse(src, &arena).unwrap();
        let uids: Vec<&str> = prog.fdecls[0].1.cfg.entry.insns.iter().map(|(u, _)| &**u).collect();
        assert_eq!(uids, vec!["_store__0", "_call__1"]);
    }

    #[test]
    fn fresh_uids_skip_written_names() {
        let arena = Arena::new();
        let src = "define void @f() {\n  call void @f()\n  %_call__0 = call void @f()\n  call void @f()\n  ret void\n}";
        let prog = parse(src, &arena).unwrap();
        let uids: Vec<&str> = prog.fdecls[0].1.cfg.entry.insns.iter().map(|(u, _)| &**u).collect();
        assert_eq!(uids, vec!["_call__1", "_call__0", "_call__2"]);
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let arena = Arena::new();
        let err = parse("define void @f() {\n  %k = alloca i64\n  %k = alloca i64\n  ret void\n}", &arena).unwrap_err();
        assert_eq!(err.to_string(), "3:3: %k is defined more than once");
        let err = parse("define void @f(i64 %x, i64 %x) {\n  ret void\n}", &arena).unwrap_err();
        assert_eq!(err.to_string(), "1:28: %x is defined more than once");

        // each function has its own names
        let src = "define void @f() {\n  %k = alloca i64\n  ret void\n}\ndefine void @g() {\n  %k = alloca i64\n  ret void\n}";
        assert!(parse(src, &arena).is_ok());
    }

    #[test]
    fn errors_point_at_the_token() {
        let arena = Arena::new();
        let err = parse("define void @f() {\n  ret i64 ,\n}", &arena).unwrap_err();
        assert_eq!(err.to_string(), "2:11: expected an operand, found Comma");
        let err = parse("define void @f(", &arena).unwrap_err();
        assert_eq!(err.to_string(), "end of input: unexpected end of input");
    }
}
