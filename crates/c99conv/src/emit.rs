//! Phase two: stream the original token sequence back out, splicing the
//! recorded rewrites in where the tables demand it.
//!
//! The token cursor, the initializer-list lookup and the literal dispatch
//! all live on one `Emitter` so the normalizer and the literal lowerer can
//! re-enter each other (a value inside a list may be a literal that itself
//! contains a list). Lists are found by binary search on their `{` offset;
//! literal records fire off a dispatch offset that starts at the context
//! start and is re-pointed at the cast between the two visits, the order
//! being re-sorted on every mutation.

use std::cmp::Reverse;
use std::io::Write;

use crate::eval;
use crate::records::*;
use crate::token::{self, Tok};
use crate::{Context, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    AwaitingUse,
    Done,
}

struct ClState {
    dispatch: usize,
    phase: Phase,
}

/// Line/column remap applied while a normalizer value is re-emitted at the
/// source position of its output slot.
#[derive(Debug, Clone, Copy)]
struct Reloc {
    base_line: u32,
    base_col: u32,
    line: u32,
    col: u32,
}

impl Reloc {
    fn map(&self, l: u32, c: u32) -> (u32, u32) {
        if l == self.base_line {
            (self.line, self.col + c.saturating_sub(self.base_col))
        } else {
            (self.line + l.saturating_sub(self.base_line), c)
        }
    }
}

pub struct Emitter<'c, W: Write> {
    ctx: &'c Context,
    out: W,
    line: u32,
    col: u32,
    cl: Vec<ClState>,
    order: Vec<usize>,
    scopes: Vec<ScopeEnd>,
    scope_next: usize,
    assigns: Vec<(usize, usize)>,
    reloc: Option<Reloc>,
}

impl<'c, W: Write> Emitter<'c, W> {
    pub fn new(ctx: &'c Context, out: W) -> Self {
        let cl: Vec<ClState> = ctx
            .literals
            .iter()
            .map(|l| ClState { dispatch: l.context.start, phase: Phase::Pending })
            .collect();
        let mut order: Vec<usize> = (0..cl.len()).collect();
        order.sort_by_key(|&i| (cl[i].dispatch, Reverse(i)));
        let mut scopes = ctx.scopes.clone();
        scopes.sort_by_key(|s| s.offset);
        let mut assigns: Vec<(usize, usize)> = ctx
            .lists
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.assignment.as_ref().map(|a| (a.assign_offset, i)))
            .collect();
        assigns.sort_unstable();
        Emitter {
            ctx,
            out,
            line: 0,
            col: 0,
            cl,
            order,
            scopes,
            scope_next: 0,
            assigns,
            reloc: None,
        }
    }

    pub fn run(mut self) -> Result<()> {
        self.emit_tokens(0, self.ctx.toks.len())?;
        self.flush_scopes(usize::MAX)?;
        self.out.flush()?;
        Ok(())
    }

    fn emit_offsets(&mut self, r: Range) -> Result<()> {
        let lo = token::index_at(&self.ctx.toks, r.start);
        let hi = token::index_at(&self.ctx.toks, r.end);
        self.emit_tokens(lo, hi)
    }

    fn emit_tokens(&mut self, mut i: usize, hi: usize) -> Result<()> {
        while i < hi {
            let off = self.ctx.toks[i].offset;
            self.flush_scopes(off)?;
            if let Some(j) = self.fire_literals(off)? {
                i = j;
                continue;
            }
            if let Some(li) = self.assign_at(off) {
                i = self.rewrite_union_assign(li)?;
                continue;
            }
            if let Some(li) = self.list_at(off) {
                i = self.rewrite_list(li, i)?;
                continue;
            }
            self.print_tok(i)?;
            i += 1;
        }
        Ok(())
    }

    fn flush_scopes(&mut self, off: usize) -> Result<()> {
        while self.scope_next < self.scopes.len() && self.scopes[self.scope_next].offset <= off {
            for _ in 0..self.scopes[self.scope_next].count {
                self.text(" }")?;
            }
            self.scope_next += 1;
        }
        Ok(())
    }

    /// Fire every literal record dispatching exactly at this offset.
    /// Declaration visits emit text and keep the token cursor in place;
    /// use visits return the token index past the skipped literal.
    /// Matching is exact so that records queued at a statement start do
    /// not fire during the nested re-emission of a sibling's value, and
    /// records of later-allocated (inner) literals fire first so their
    /// temporaries are declared before the outer ones reference them.
    fn fire_literals(&mut self, off: usize) -> Result<Option<usize>> {
        loop {
            let k = {
                let cl = &self.cl;
                let lo = self.order.partition_point(|&i| cl[i].dispatch < off);
                let mut chosen = None;
                for &k in &self.order[lo..] {
                    if cl[k].dispatch > off {
                        break;
                    }
                    if cl[k].phase != Phase::Done {
                        chosen = Some(k);
                        break;
                    }
                }
                match chosen {
                    Some(k) => k,
                    None => return Ok(None),
                }
            };
            let class = self.ctx.literals[k].class;
            match (class, self.cl[k].phase) {
                (_, Phase::Done) => unreachable!("done records are filtered above"),
                (LiteralClass::OmitCast, _) => {
                    self.cl[k].phase = Phase::Done;
                    let to = self.ctx.literals[k].value.start;
                    return Ok(Some(token::index_at(&self.ctx.toks, to)));
                }
                (LiteralClass::NewContext, _) => {
                    self.text(" { ")?;
                    self.cl[k].phase = Phase::Done;
                }
                (LiteralClass::TempAssign, Phase::Pending) => {
                    self.text(" { ")?;
                    self.literal_decl(k, false)?;
                    self.repoint(k);
                }
                (LiteralClass::ConstDecl, Phase::Pending) => {
                    self.literal_decl(k, true)?;
                    self.repoint(k);
                }
                (LiteralClass::TempAssign, Phase::AwaitingUse)
                | (LiteralClass::ConstDecl, Phase::AwaitingUse) => {
                    let name = self.ctx.literals[k].name.clone().unwrap_or_default();
                    self.text(&name)?;
                    self.cl[k].phase = Phase::Done;
                    let to = self.ctx.literals[k].value.end;
                    return Ok(Some(token::index_at(&self.ctx.toks, to)));
                }
                (LiteralClass::LoopContext, Phase::Pending) => {
                    self.text(" { ")?;
                    let v = self.ctx.literals[k].value;
                    self.emit_offsets(v)?;
                    self.text(" ")?;
                    self.cl[k].dispatch = v.start;
                    self.cl[k].phase = Phase::AwaitingUse;
                    self.resort();
                }
                (LiteralClass::LoopContext, Phase::AwaitingUse) => {
                    // the declaration moved out; keep the header's `;`
                    self.text(";")?;
                    self.cl[k].phase = Phase::Done;
                    let to = self.ctx.literals[k].value.end;
                    return Ok(Some(token::index_at(&self.ctx.toks, to)));
                }
            }
        }
    }

    fn repoint(&mut self, k: usize) {
        self.cl[k].dispatch = self.ctx.literals[k].cast.start;
        self.cl[k].phase = Phase::AwaitingUse;
        self.resort();
    }

    fn resort(&mut self) {
        let cl = &self.cl;
        self.order.sort_by_key(|&i| (cl[i].dispatch, Reverse(i)));
    }

    /// `T tmp__N[dims] = { ... }; ` built from the cast tokens, with the
    /// generated name spliced in before the array brackets.
    fn literal_decl(&mut self, k: usize, is_static: bool) -> Result<()> {
        let ctx = self.ctx;
        let lit = &ctx.literals[k];
        if is_static {
            self.text("static ")?;
        }
        let toks = token::slice_range(&ctx.toks, lit.cast);
        let inner: &[Tok] = if toks.len() >= 2 { &toks[1..toks.len() - 1] } else { toks };
        let split = lit
            .bracket
            .map(|b| inner.iter().position(|t| t.offset >= b).unwrap_or(inner.len()))
            .unwrap_or(inner.len());
        let mut head = String::new();
        for t in &inner[..split] {
            if !head.is_empty() {
                head.push(' ');
            }
            head.push_str(&t.spelling);
        }
        let mut tail = String::new();
        for t in &inner[split..] {
            tail.push_str(&t.spelling);
        }
        self.text(&head)?;
        self.text(" ")?;
        let name = lit.name.clone().unwrap_or_default();
        self.text(&name)?;
        if !tail.is_empty() {
            self.text(&tail)?;
        }
        self.text(" = ")?;
        self.emit_offsets(lit.value)?;
        self.text("; ")?;
        Ok(())
    }

    fn assign_at(&self, off: usize) -> Option<usize> {
        self.assigns
            .binary_search_by_key(&off, |a| a.0)
            .ok()
            .map(|i| self.assigns[i].1)
    }

    fn list_at(&self, off: usize) -> Option<usize> {
        let i = self
            .ctx
            .lists
            .binary_search_by_key(&off, |l| l.range.start)
            .ok()?;
        let l = &self.ctx.lists[i];
        if l.kind != ListKind::Irrelevant && !l.entries.is_empty() && l.assignment.is_none() {
            Some(i)
        } else {
            None
        }
    }

    /// Positional-output normalization: walk the output slots in order,
    /// emitting the designated value for each and a zero filler for each
    /// gap. Union lists emit exactly one value.
    fn rewrite_list(&mut self, li: usize, open: usize) -> Result<usize> {
        let ctx = self.ctx;
        let il = &ctx.lists[li];
        self.print_tok(open)?;
        let is_union = il
            .agg
            .strukt
            .map(|s| il.agg.array_depth == 0 && ctx.structs[s].is_union)
            .unwrap_or(false);
        let extent = self.list_extent(il, is_union);
        let mut emitted = 0usize;
        let mut any = false;
        for j in 0..extent {
            match il.entries.iter().find(|e| e.index == j) {
                None => {
                    if is_union {
                        continue;
                    }
                    if any {
                        self.text(",")?;
                    }
                    if self.slot_is_aggregate(il, j) {
                        self.text(" { 0 }")?;
                    } else {
                        self.text(" 0")?;
                    }
                    any = true;
                }
                Some(en) => {
                    if any {
                        self.text(",")?;
                    }
                    let slot = &il.entries[emitted.min(il.entries.len() - 1)];
                    let quirk = if is_union && en.index != 0 {
                        il.agg.strukt.map(|s| (s, en.index))
                    } else {
                        None
                    };
                    self.emit_value(slot.expr.start, en.value, quirk)?;
                    emitted += 1;
                    any = true;
                    if is_union {
                        break;
                    }
                }
            }
        }
        let close = token::index_at(&ctx.toks, il.range.end.saturating_sub(1));
        self.print_tok(close)?;
        Ok(close + 1)
    }

    /// Declared extent of the output: member count for structs and
    /// unions, highest targeted index + 1 for arrays.
    fn list_extent(&self, il: &InitList, _is_union: bool) -> usize {
        let max = il.entries.iter().map(|e| e.index + 1).max().unwrap_or(0);
        match il.kind {
            ListKind::ArrayDesignator => max,
            _ => {
                if il.agg.array_depth > 0 {
                    max
                } else {
                    il.agg
                        .strukt
                        .map(|s| self.ctx.structs[s].members.len())
                        .unwrap_or(max)
                }
            }
        }
    }

    /// A gap whose element is itself aggregate gets `{ 0 }`, scalars `0`.
    fn slot_is_aggregate(&self, il: &InitList, j: usize) -> bool {
        if il.agg.array_depth > 0 {
            return il.agg.array_depth > 1 || il.agg.strukt.is_some();
        }
        il.agg
            .strukt
            .and_then(|s| self.ctx.structs[s].members.get(j))
            .map(|m| (m.struct_ref.is_some() && m.ptr_depth == 0) || m.array_depth > 0)
            .unwrap_or(false)
    }

    /// Emit one entry's value, relocated to the output slot's source
    /// position so the rewritten list reads in the original visual order.
    fn emit_value(&mut self, slot_off: usize, value: Range, quirk: Option<(usize, usize)>) -> Result<()> {
        let (sl, sc) = self.pos_of_offset(slot_off);
        let (tl, tc) = match self.reloc {
            Some(r) => r.map(sl, sc),
            None => (sl, sc),
        };
        let (bl, bc) = self.pos_of_offset(value.start);
        let saved = self.reloc;
        self.reloc = Some(Reloc { base_line: bl, base_col: bc, line: tl, col: tc });
        let res = match quirk {
            None => self.emit_offsets(value),
            Some((si, mi)) => self.union_first_member_value(si, mi, value),
        };
        self.reloc = saved;
        res
    }

    /// A union list targeting a non-first member, forced into positional
    /// form: the value initializes the first member, so convert it.
    fn union_first_member_value(&mut self, si: usize, mi: usize, value: Range) -> Result<()> {
        let (first_ptr, target_ptr, first_float, target_float, target_ty) = {
            let m = &self.ctx.structs[si].members;
            let first = &m[0];
            let target = m.get(mi).ok_or_else(|| Error::UnknownField(format!("#{}", mi)))?;
            (
                first.ptr_depth > 0,
                target.ptr_depth > 0,
                first.ptr_depth == 0 && is_float_type(&first.type_name),
                target.ptr_depth == 0 && is_float_type(&target.type_name),
                target.type_name.clone(),
            )
        };
        if first_ptr && !target_ptr {
            self.text("(void*)")?;
            return self.emit_offsets(value);
        }
        if target_ptr && !first_ptr {
            self.text("(intptr_t)")?;
            return self.emit_offsets(value);
        }
        if first_float == target_float {
            return self.emit_offsets(value);
        }
        if !target_float {
            return Err(Error::UnsupportedExpression(
                "integer value for a floating union member".into(),
            ));
        }
        let v = {
            let toks = token::slice_range(&self.ctx.toks, value);
            eval::eval_float(toks)?
        };
        if target_ty.split_whitespace().any(|w| w == "float") {
            self.text(&format!("0x{:x}", (v as f32).to_bits()))?;
        } else {
            self.text(&format!("0x{:x}", v.to_bits()))?;
        }
        Ok(())
    }

    /// Union initializer inside a function: terminate the declaration,
    /// assign each member, then open the replacement scope.
    fn rewrite_union_assign(&mut self, li: usize) -> Result<usize> {
        let ctx = self.ctx;
        let il = &ctx.lists[li];
        let assign = match &il.assignment {
            Some(a) => a,
            None => return Err(Error::NoEnclosingScope),
        };
        let si = il
            .agg
            .strukt
            .ok_or_else(|| Error::UnknownField(assign.var.clone()))?;
        self.text(";")?;
        for en in &il.entries {
            let member = ctx.structs[si]
                .members
                .get(en.index)
                .map(|m| m.name.clone())
                .ok_or_else(|| Error::UnknownField(format!("#{}", en.index)))?;
            self.text(&format!(" {}.{} = ", assign.var, member))?;
            self.emit_offsets(en.value)?;
            self.text(";")?;
        }
        self.text(" {")?;
        Ok(token::index_at(&ctx.toks, il.range.end))
    }

    fn pos_of_offset(&self, off: usize) -> (u32, u32) {
        let i = token::index_at(&self.ctx.toks, off);
        self.ctx
            .toks
            .get(i)
            .map(|t| (t.line, t.col))
            .unwrap_or((self.line, self.col))
    }

    /// Print one token, padding with newlines and spaces to its recorded
    /// position when that is ahead of the output cursor, and with a single
    /// separating space when it is behind. The line cursor never moves
    /// backwards.
    fn print_tok(&mut self, i: usize) -> Result<()> {
        let ctx = self.ctx;
        let t = &ctx.toks[i];
        let (l, c) = match self.reloc {
            Some(r) => r.map(t.line, t.col),
            None => (t.line, t.col),
        };
        if l > self.line {
            for _ in self.line..l {
                self.out.write_all(b"\n")?;
            }
            self.line = l;
            self.col = 0;
        }
        if c > self.col {
            for _ in self.col..c {
                self.out.write_all(b" ")?;
            }
            self.col = c;
        } else if c < self.col && self.col > 0 {
            self.out.write_all(b" ")?;
            self.col += 1;
        }
        self.out.write_all(t.spelling.as_bytes())?;
        let newlines = t.spelling.bytes().filter(|&b| b == b'\n').count() as u32;
        if newlines > 0 {
            self.line += newlines;
            self.col = t.spelling.rsplit('\n').next().unwrap_or("").len() as u32;
        } else {
            self.col += t.spelling.len() as u32;
        }
        Ok(())
    }

    fn text(&mut self, s: &str) -> Result<()> {
        self.out.write_all(s.as_bytes())?;
        self.col += s.len() as u32;
        Ok(())
    }
}

fn is_float_type(type_name: &str) -> bool {
    type_name
        .split_whitespace()
        .any(|w| w == "float" || w == "double")
}
