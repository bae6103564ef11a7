//! Phase one: a single recursive visitor over the clang AST that fills
//! the symbol tables and the rewrite-record tables. Nothing here emits.
//!
//! Parent state is threaded through a stack-allocated chain of `Frame`s,
//! one per visited node, each linking to its parent. The chain carries
//! the table entry currently being populated, the aggregate type in
//! scope, the positional counter of the enclosing initializer list, and
//! the declaration-ordering bookkeeping of the enclosing block.

use std::cell::Cell;

use clang::{Entity, EntityKind, TranslationUnit};

use crate::eval;
use crate::records::*;
use crate::symtab::{EnumConstant, StructMember, TypedefBacking};
use crate::token;
use crate::{Context, Error, Result};

pub fn build(ctx: &mut Context, tu: &TranslationUnit<'_>) -> Result<()> {
    let root = tu.get_entity();
    let frame = Frame {
        parent: None,
        kind: root.get_kind(),
        extent: token::extent(root).unwrap_or_default(),
        stmt_slot: false,
        in_function: false,
        list: None,
        literal: None,
        var: None,
        agg: Cell::new(AggRef::default()),
        next_slot: Cell::new(0),
        seen_stmt: Cell::new(false),
        prev_was_decl: Cell::new(false),
        desig: Cell::new(None),
    };
    Walker { ctx }.recurse(root, &frame)
}

pub(crate) struct Frame<'f> {
    parent: Option<&'f Frame<'f>>,
    kind: EntityKind,
    extent: Range,
    /// Whether this child position may be replaced by a brace block.
    stmt_slot: bool,
    in_function: bool,
    list: Option<usize>,
    literal: Option<usize>,
    var: Option<String>,
    agg: Cell<AggRef>,
    /// Positional counter of an initializer-list frame.
    next_slot: Cell<usize>,
    seen_stmt: Cell<bool>,
    prev_was_decl: Cell<bool>,
    /// Index a designator wrapper assigns to its value child.
    desig: Cell<Option<usize>>,
}

fn child_frame<'f>(up: &'f Frame<'f>, kind: EntityKind, extent: Range, stmt_slot: bool) -> Frame<'f> {
    Frame {
        parent: Some(up),
        kind,
        extent,
        stmt_slot,
        in_function: up.in_function || kind == EntityKind::FunctionDecl,
        list: None,
        literal: None,
        var: None,
        agg: Cell::new(AggRef::default()),
        next_slot: Cell::new(0),
        seen_stmt: Cell::new(false),
        prev_was_decl: Cell::new(false),
        desig: Cell::new(None),
    }
}

/// Whether the child at `index` of a node of kind `parent` sits where a
/// statement goes, i.e. where a `{ ... }` block may substitute for it.
fn stmt_slot_of(parent: EntityKind, index: usize, siblings: usize) -> bool {
    match parent {
        EntityKind::CompoundStmt => true,
        EntityKind::IfStmt => index >= 1,
        EntityKind::WhileStmt | EntityKind::SwitchStmt => index == 1,
        EntityKind::DoStmt => index == 0,
        EntityKind::ForStmt | EntityKind::CaseStmt => siblings > 0 && index == siblings - 1,
        EntityKind::DefaultStmt | EntityKind::LabelStmt => true,
        _ => false,
    }
}

struct Walker<'c> {
    ctx: &'c mut Context,
}

impl<'c> Walker<'c> {
    fn recurse(&mut self, e: Entity<'_>, fr: &Frame<'_>) -> Result<()> {
        let children = e.get_children();
        let siblings = children.len();
        for (i, ch) in children.into_iter().enumerate() {
            self.visit(ch, fr, i, siblings)?;
        }
        Ok(())
    }

    fn visit(&mut self, e: Entity<'_>, up: &Frame<'_>, index: usize, siblings: usize) -> Result<()> {
        let kind = e.get_kind();
        let extent = match token::extent(e) {
            Some(r) => r,
            None => return Ok(()),
        };
        let stmt_slot = stmt_slot_of(up.kind, index, siblings);

        // blocks: C89 wants declarations before the first statement
        if up.kind == EntityKind::CompoundStmt {
            if kind == EntityKind::DeclStmt {
                if up.seen_stmt.get() && !up.prev_was_decl.get() {
                    self.open_context(extent.start, up);
                }
                up.prev_was_decl.set(true);
            } else {
                up.seen_stmt.set(true);
                up.prev_was_decl.set(false);
            }
        }

        match kind {
            EntityKind::TypedefDecl => self.typedef_decl(e, extent),
            EntityKind::StructDecl | EntityKind::UnionDecl => {
                let idx = self.struct_decl(e, extent, kind == EntityKind::UnionDecl)?;
                if up.kind == EntityKind::VarDecl {
                    let cur = up.agg.get();
                    if cur.strukt.is_none() {
                        up.agg.set(AggRef { strukt: Some(idx), array_depth: cur.array_depth });
                    }
                }
                Ok(())
            }
            EntityKind::EnumDecl => self.enum_decl(e, extent).map(|_| ()),
            EntityKind::VarDecl => self.var_decl(e, up, extent, stmt_slot),
            EntityKind::CompoundLiteralExpr => self.compound_literal(e, up, extent, stmt_slot),
            EntityKind::InitListExpr => self.init_list(e, up, extent, stmt_slot),
            EntityKind::UnexposedExpr if up.list.is_some() => {
                self.maybe_designator(e, up, extent, stmt_slot)
            }
            EntityKind::ForStmt => self.for_stmt(e, up, extent, stmt_slot),
            _ => {
                self.default_entry(up, extent);
                let fr = child_frame(up, kind, extent, stmt_slot);
                self.recurse(e, &fr)
            }
        }
    }

    /// Positional bookkeeping: a plain value under an initializer list
    /// still claims an entry at the next slot, keeping sparse designated
    /// initializers aligned with their positional neighbours.
    fn default_entry(&mut self, up: &Frame<'_>, extent: Range) {
        if let Some(li) = up.list {
            let slot = up.next_slot.get();
            self.ctx.lists[li].entries.push(InitEntry {
                index: slot,
                expr: extent,
                value: extent,
            });
            up.next_slot.set(slot + 1);
        }
    }

    fn typedef_decl(&mut self, e: Entity<'_>, extent: Range) -> Result<()> {
        let name = match e.get_name() {
            Some(n) => n,
            None => return Ok(()),
        };
        let mut backing = None;
        for ch in e.get_children() {
            let cext = match token::extent(ch) {
                Some(r) => r,
                None => continue,
            };
            match ch.get_kind() {
                EntityKind::StructDecl | EntityKind::UnionDecl => {
                    let idx = self.struct_decl(ch, cext, ch.get_kind() == EntityKind::UnionDecl)?;
                    backing = Some(TypedefBacking::Struct(idx));
                }
                EntityKind::EnumDecl => {
                    let idx = self.enum_decl(ch, cext)?;
                    backing = Some(TypedefBacking::Enum(idx));
                }
                _ => {}
            }
        }
        let backing = match backing {
            Some(b) => b,
            None => {
                let toks = token::slice_range(&self.ctx.toks, extent);
                let name_off = token::location_offset(e);
                let pos = name_off
                    .and_then(|off| toks.iter().position(|t| t.offset == off))
                    .unwrap_or(toks.len());
                let mut text = String::new();
                for t in toks.iter().take(pos).skip(1) {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(&t.spelling);
                }
                let array_depth = toks
                    .iter()
                    .skip(pos + 1)
                    .take_while(|t| t.spelling != ";" && t.spelling != ",")
                    .filter(|t| t.spelling == "[")
                    .count() as u32;
                TypedefBacking::Proxy { text, array_depth }
            }
        };
        self.ctx.register_typedef(&name, extent.start, backing);
        Ok(())
    }

    fn struct_decl(&mut self, e: Entity<'_>, extent: Range, is_union: bool) -> Result<usize> {
        let name = e.get_name().unwrap_or_default();
        let idx = self.ctx.register_struct(&name, extent.start, is_union);
        if !self.ctx.structs[idx].members.is_empty() {
            return Ok(idx);
        }
        let mut members: Vec<StructMember> = Vec::new();
        for ch in e.get_children() {
            let cext = match token::extent(ch) {
                Some(r) => r,
                None => continue,
            };
            match ch.get_kind() {
                EntityKind::FieldDecl => {
                    if let Some(m) = self.field_member(ch, cext, &members)? {
                        members.push(m);
                    }
                }
                EntityKind::StructDecl | EntityKind::UnionDecl => {
                    // register inline member types before the fields that use them
                    self.struct_decl(ch, cext, ch.get_kind() == EntityKind::UnionDecl)?;
                }
                EntityKind::EnumDecl => {
                    self.enum_decl(ch, cext)?;
                }
                _ => {}
            }
        }
        self.ctx.structs[idx].members = members;
        Ok(idx)
    }

    fn field_member(
        &self,
        e: Entity<'_>,
        extent: Range,
        prior: &[StructMember],
    ) -> Result<Option<StructMember>> {
        let name = match e.get_name() {
            // padding bit-fields have no name and no initializer slot
            Some(n) => n,
            None => return Ok(None),
        };
        let toks = token::slice_range(&self.ctx.toks, extent);
        let name_off = token::location_offset(e);
        let pos = match name_off.and_then(|off| toks.iter().position(|t| t.offset == off)) {
            Some(p) => p,
            None => return Err(Error::MissingDeclarator(name)),
        };
        let mut j = pos;
        let mut ptr_depth = 0u32;
        while j > 0 {
            match toks[j - 1].spelling.as_str() {
                "*" => {
                    ptr_depth += 1;
                    j -= 1;
                }
                "const" | "volatile" | "restrict" => j -= 1,
                _ => break,
            }
        }
        let inherits = j > 0 && toks[j - 1].spelling == ",";
        let mut array_depth = 0u32;
        for t in &toks[pos + 1..] {
            match t.spelling.as_str() {
                "," | ";" | "=" | ":" => break,
                "[" => array_depth += 1,
                _ => {}
            }
        }
        let type_name = if inherits {
            prior.last().map(|m| m.type_name.clone()).unwrap_or_default()
        } else {
            let mut s = String::new();
            for t in &toks[..j] {
                if !s.is_empty() {
                    s.push(' ');
                }
                s.push_str(&t.spelling);
            }
            s
        };
        let struct_ref = if ptr_depth == 0 {
            self.member_struct_ref(e, &type_name)
        } else {
            None
        };
        Ok(Some(StructMember {
            name,
            type_name,
            ptr_depth,
            array_depth,
            struct_ref,
            decl_offset: extent.start,
        }))
    }

    fn member_struct_ref(&self, e: Entity<'_>, type_name: &str) -> Option<usize> {
        // inline definition child wins
        for ch in e.get_children() {
            if matches!(ch.get_kind(), EntityKind::StructDecl | EntityKind::UnionDecl) {
                if let Some(r) = token::extent(ch) {
                    if let Some(i) = self.ctx.find_struct_by_offset(r.start) {
                        return Some(i);
                    }
                }
            }
        }
        let words: Vec<&str> = type_name
            .split_whitespace()
            .filter(|w| !matches!(*w, "const" | "volatile" | "static"))
            .collect();
        match words.as_slice() {
            ["struct", n] | ["union", n] => self.ctx.find_struct_by_name(n),
            ["enum", _] => None,
            [n] => self.ctx.resolve_aggregate(n).and_then(|a| {
                if a.array_depth == 0 {
                    a.strukt
                } else {
                    None
                }
            }),
            _ => None,
        }
    }

    fn enum_decl(&mut self, e: Entity<'_>, extent: Range) -> Result<usize> {
        let name = e.get_name().unwrap_or_default();
        let idx = self.ctx.register_enum(&name, extent.start);
        if !self.ctx.enums[idx].constants.is_empty() {
            return Ok(idx);
        }
        for ch in e.get_children() {
            if ch.get_kind() != EntityKind::EnumConstantDecl {
                continue;
            }
            let cname = match ch.get_name() {
                Some(n) => n,
                None => continue,
            };
            let value = match ch.get_children().into_iter().next() {
                Some(expr) => eval::eval_int(expr, self.ctx)?,
                None => self.ctx.enums[idx]
                    .constants
                    .last()
                    .map(|c| c.value + 1)
                    .unwrap_or(0),
            };
            self.ctx.enums[idx].constants.push(EnumConstant { name: cname, value });
        }
        Ok(idx)
    }

    fn var_decl(&mut self, e: Entity<'_>, up: &Frame<'_>, extent: Range, stmt_slot: bool) -> Result<()> {
        let name = e.get_name().unwrap_or_default();
        let agg = self.var_aggregate(e, extent);
        log::debug!("var {:?}: {:?}", name, agg);
        let mut fr = child_frame(up, EntityKind::VarDecl, extent, stmt_slot);
        fr.var = Some(name);
        fr.agg = Cell::new(agg);
        self.recurse(e, &fr)
    }

    /// Find the declared type in the declarator tokens: walk back from the
    /// identifier over the pointer run, then accept `struct NAME`,
    /// `union NAME`, or a typedef name. Array depth is the bracket count
    /// right of the identifier.
    fn var_aggregate(&self, e: Entity<'_>, extent: Range) -> AggRef {
        let toks = token::slice_range(&self.ctx.toks, extent);
        let name_off = token::location_offset(e);
        let pos = match name_off.and_then(|off| toks.iter().position(|t| t.offset == off)) {
            Some(p) => p,
            None => return AggRef::default(),
        };
        let mut j = pos;
        let mut ptr_depth = 0u32;
        while j > 0 {
            match toks[j - 1].spelling.as_str() {
                "*" => {
                    ptr_depth += 1;
                    j -= 1;
                }
                "const" | "volatile" | "restrict" => j -= 1,
                _ => break,
            }
        }
        let mut array_depth = 0u32;
        for t in &toks[pos + 1..] {
            match t.spelling.as_str() {
                "=" | ";" | "," | "(" | ")" => break,
                "[" => array_depth += 1,
                _ => {}
            }
        }
        if ptr_depth > 0 || j == 0 {
            return AggRef { strukt: None, array_depth };
        }
        let tname = toks[j - 1].spelling.as_str();
        let tagged = j >= 2 && matches!(toks[j - 2].spelling.as_str(), "struct" | "union");
        let strukt = if tagged {
            self.ctx.find_struct_by_name(tname)
        } else if j >= 2 && toks[j - 2].spelling == "enum" {
            None
        } else if let Some(a) = self.ctx.resolve_aggregate(tname) {
            return AggRef { strukt: a.strukt, array_depth: array_depth + a.array_depth };
        } else {
            None
        };
        // anonymous inline definitions share the declaration's start offset
        let strukt = strukt.or_else(|| self.ctx.find_struct_by_offset(extent.start));
        AggRef { strukt, array_depth }
    }

    fn compound_literal(
        &mut self,
        e: Entity<'_>,
        up: &Frame<'_>,
        extent: Range,
        stmt_slot: bool,
    ) -> Result<()> {
        self.default_entry(up, extent);
        let value = e
            .get_children()
            .into_iter()
            .find(|c| c.get_kind() == EntityKind::InitListExpr)
            .and_then(token::extent);
        let value = match value {
            Some(v) => v,
            None => {
                let fr = child_frame(up, EntityKind::CompoundLiteralExpr, extent, stmt_slot);
                return self.recurse(e, &fr);
            }
        };
        let cast = Range::new(extent.start, value.start);
        let (agg, bracket) = self.cast_aggregate(cast);
        let (class, context) = self.classify_literal(up, extent, stmt_slot, agg)?;
        let name = match class {
            LiteralClass::TempAssign | LiteralClass::ConstDecl => Some(self.ctx.fresh_name()),
            _ => None,
        };
        log::debug!("literal {:?} {:?} at {}..{}", class, name, extent.start, extent.end);
        let idx = self.ctx.literals.len();
        self.ctx.literals.push(Literal {
            class,
            cast,
            bracket,
            value,
            context,
            agg,
            name,
        });
        let mut fr = child_frame(up, EntityKind::CompoundLiteralExpr, extent, stmt_slot);
        fr.literal = Some(idx);
        fr.agg = Cell::new(agg);
        self.recurse(e, &fr)
    }

    fn cast_aggregate(&self, cast: Range) -> (AggRef, Option<usize>) {
        let toks = token::slice_range(&self.ctx.toks, cast);
        let inner: &[token::Tok] = if toks.len() >= 2 { &toks[1..toks.len() - 1] } else { toks };
        let mut i = 0;
        while i < inner.len() && matches!(inner[i].spelling.as_str(), "const" | "volatile") {
            i += 1;
        }
        let mut strukt = None;
        let mut extra = 0u32;
        if i < inner.len() {
            match inner[i].spelling.as_str() {
                "struct" | "union" => {
                    if let Some(n) = inner.get(i + 1) {
                        strukt = self.ctx.find_struct_by_name(&n.spelling);
                        i += 2;
                    }
                }
                "enum" => i += 2,
                _ => {
                    if let Some(a) = self.ctx.resolve_aggregate(&inner[i].spelling) {
                        strukt = a.strukt;
                        extra = a.array_depth;
                    }
                    i += 1;
                }
            }
        }
        let mut bracket = None;
        let mut array_depth = extra;
        for t in &inner[i.min(inner.len())..] {
            if t.spelling == "[" {
                if bracket.is_none() {
                    bracket = Some(t.offset);
                }
                array_depth += 1;
            }
        }
        (AggRef { strukt, array_depth }, bracket)
    }

    /// Lineage classification: decide the rewrite class from the ancestor
    /// chain, and reserve the scope closer where one is needed.
    fn classify_literal(
        &mut self,
        up: &Frame<'_>,
        extent: Range,
        stmt_slot: bool,
        agg: AggRef,
    ) -> Result<(LiteralClass, Range)> {
        // whole initializer of a matching variable declaration
        let mut anc = Some(up);
        while let Some(f) = anc {
            match f.kind {
                EntityKind::UnexposedExpr if f.desig.get().is_none() && f.list.is_none() => {
                    anc = f.parent
                }
                _ => break,
            }
        }
        if let Some(f) = anc {
            if f.kind == EntityKind::VarDecl && agg.strukt.is_some() && f.agg.get() == agg {
                return Ok((LiteralClass::OmitCast, Range::new(extent.start, extent.start)));
            }
        }
        if !up.in_function {
            // file scope: hoist before the enclosing top-level declaration
            let mut cur = up;
            while let Some(p) = cur.parent {
                if p.parent.is_none() {
                    break;
                }
                cur = p;
            }
            return Ok((LiteralClass::ConstDecl, cur.extent));
        }
        if stmt_slot {
            // the literal is itself an expression statement
            let close = self.offset_after_statement(extent.end);
            self.ctx.push_scope_end(close, 1);
            return Ok((LiteralClass::TempAssign, Range::new(extent.start, close)));
        }
        let mut f = Some(up);
        while let Some(fr) = f {
            if fr.stmt_slot {
                let close = if fr.kind == EntityKind::DeclStmt {
                    // keep the declared names alive for the rest of the block
                    self.enclosing_compound_close(fr)?
                } else {
                    self.offset_after_statement(fr.extent.end)
                };
                self.ctx.push_scope_end(close, 1);
                return Ok((LiteralClass::TempAssign, Range::new(fr.extent.start, close)));
            }
            f = fr.parent;
        }
        Err(Error::NoEnclosingScope)
    }

    fn enclosing_compound_close(&self, from: &Frame<'_>) -> Result<usize> {
        let mut f = Some(from);
        while let Some(fr) = f {
            if fr.kind == EntityKind::CompoundStmt {
                return Ok(fr.extent.end.saturating_sub(1));
            }
            f = fr.parent;
        }
        Err(Error::NoEnclosingScope)
    }

    /// Offset just past a statement, stepping over the terminating `;`
    /// when the cursor extent excludes it.
    fn offset_after_statement(&self, end: usize) -> usize {
        let i = token::index_at(&self.ctx.toks, end);
        match self.ctx.toks.get(i) {
            Some(t) if t.spelling == ";" => t.offset + 1,
            _ => end,
        }
    }

    fn init_list(&mut self, e: Entity<'_>, up: &Frame<'_>, extent: Range, stmt_slot: bool) -> Result<()> {
        let (agg, level) = self.list_context(up);
        let idx = self.ctx.lists.len();
        self.ctx.lists.push(InitList {
            kind: ListKind::Irrelevant,
            agg,
            level,
            range: extent,
            entries: Vec::new(),
            assignment: None,
        });
        if up.list.is_some() {
            // a nested list claims a positional slot but no entry
            up.next_slot.set(up.next_slot.get() + 1);
        }
        let mut fr = child_frame(up, EntityKind::InitListExpr, extent, stmt_slot);
        fr.list = Some(idx);
        fr.agg = Cell::new(agg);
        self.recurse(e, &fr)?;
        self.finish_list(idx, up)
    }

    /// The aggregate a list is filling flows from the enclosing variable
    /// declaration, compound literal, designator, or parent list.
    fn list_context(&self, up: &Frame<'_>) -> (AggRef, u32) {
        let mut level = 0u32;
        let mut f = Some(up);
        while let Some(fr) = f {
            if fr.list.is_some() {
                level += 1;
            }
            f = fr.parent;
        }
        let mut f = Some(up);
        while let Some(fr) = f {
            if fr.desig.get().is_some() || fr.kind == EntityKind::VarDecl || fr.literal.is_some() {
                return (fr.agg.get(), level);
            }
            if let Some(pl) = fr.list {
                let p = &self.ctx.lists[pl];
                let slot = fr.next_slot.get();
                let agg = if p.agg.array_depth > 0 {
                    p.agg.element()
                } else if let Some(si) = p.agg.strukt {
                    self.ctx.structs[si]
                        .members
                        .get(slot)
                        .map(|m| AggRef {
                            strukt: if m.ptr_depth == 0 { m.struct_ref } else { None },
                            array_depth: m.array_depth,
                        })
                        .unwrap_or_default()
                } else {
                    AggRef::default()
                };
                return (agg, level);
            }
            match fr.kind {
                EntityKind::ParenExpr | EntityKind::UnexposedExpr => f = fr.parent,
                _ => break,
            }
        }
        (AggRef::default(), level)
    }

    /// A designated list over a union, targeting a member other than the
    /// first, inside a function body: lower to member assignments.
    fn finish_list(&mut self, idx: usize, up: &Frame<'_>) -> Result<()> {
        {
            let il = &self.ctx.lists[idx];
            let si = match il.agg.strukt {
                Some(s) if il.agg.array_depth == 0 => s,
                _ => return Ok(()),
            };
            if !self.ctx.structs[si].is_union || il.kind != ListKind::StructDesignator {
                return Ok(());
            }
            match il.entries.first() {
                Some(e) if e.index != 0 => {}
                _ => return Ok(()),
            }
        }
        if !up.in_function || self.ctx.ms_compat {
            // positional form with first-member conversion, done at emission
            return Ok(());
        }
        if self.ctx.lists[idx].level != 0 || up.kind != EntityKind::VarDecl {
            return Ok(());
        }
        let var = match &up.var {
            Some(v) if !v.is_empty() => v.clone(),
            _ => return Ok(()),
        };
        let range_start = self.ctx.lists[idx].range.start;
        let lo = token::index_at(&self.ctx.toks, up.extent.start);
        let hi = token::index_at(&self.ctx.toks, range_start);
        let assign_offset = match self.ctx.toks[lo..hi].iter().rev().find(|t| t.spelling == "=") {
            Some(t) => t.offset,
            None => return Ok(()),
        };
        let close = self.enclosing_compound_close(up)?;
        self.ctx.push_scope_end(close, 1);
        self.ctx.lists[idx].assignment = Some(UnionAssign { var, assign_offset });
        Ok(())
    }

    /// An unexposed expression directly under an initializer list is a
    /// designator when its tokens start `[`, `.`, or `name :`.
    fn maybe_designator(
        &mut self,
        e: Entity<'_>,
        up: &Frame<'_>,
        extent: Range,
        stmt_slot: bool,
    ) -> Result<()> {
        let li = match up.list {
            Some(l) => l,
            None => return Ok(()),
        };
        enum Desig {
            Array { value_from: usize },
            Member { name: String, value_from: usize },
        }
        let found = {
            let toks = token::slice_range(&self.ctx.toks, extent);
            let t0 = toks.first().map(|t| t.spelling.as_str()).unwrap_or("");
            let t1 = toks.get(1).map(|t| t.spelling.as_str()).unwrap_or("");
            if t0 == "[" {
                let mut depth = 0usize;
                let mut close = None;
                for (i, t) in toks.iter().enumerate() {
                    match t.spelling.as_str() {
                        "[" => depth += 1,
                        "]" => {
                            depth -= 1;
                            if depth == 0 {
                                close = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let close = close.ok_or(Error::UnknownToken("[".into()))?;
                match toks.get(close + 1).map(|t| t.spelling.as_str()) {
                    Some("=") => Some(Desig::Array { value_from: close + 2 }),
                    Some("[") => {
                        return Err(Error::UnsupportedExpression(
                            "multi-dimensional designator".into(),
                        ))
                    }
                    _ => None,
                }
            } else if t0 == "." {
                match toks.get(2).map(|t| t.spelling.as_str()) {
                    Some("=") => Some(Desig::Member { name: t1.to_string(), value_from: 3 }),
                    Some(".") | Some("[") => {
                        return Err(Error::UnsupportedExpression("nested designator".into()))
                    }
                    _ => None,
                }
            } else if t1 == ":" && !t0.is_empty() && t0.chars().all(|c| c.is_alphanumeric() || c == '_') {
                // legacy GCC `member: value`
                Some(Desig::Member { name: t0.to_string(), value_from: 2 })
            } else {
                None
            }
        };

        let desig = match found {
            Some(d) => d,
            None => {
                self.default_entry(up, extent);
                let fr = child_frame(up, EntityKind::UnexposedExpr, extent, stmt_slot);
                return self.recurse(e, &fr);
            }
        };

        let agg = self.ctx.lists[li].agg;
        let (kind, index, value_from) = match desig {
            Desig::Array { value_from } => {
                let index = self.designated_index(e, extent, value_from)?;
                (ListKind::ArrayDesignator, index, value_from)
            }
            Desig::Member { name, value_from } => {
                let si = agg
                    .strukt
                    .filter(|_| agg.array_depth == 0)
                    .ok_or_else(|| Error::UnknownField(name.clone()))?;
                let index = self.ctx.structs[si]
                    .members
                    .iter()
                    .position(|m| m.name == name)
                    .ok_or(Error::UnknownField(name))?;
                (ListKind::StructDesignator, index, value_from)
            }
        };
        self.set_list_kind(li, kind)?;

        let value = {
            let toks = token::slice_range(&self.ctx.toks, extent);
            let start = toks.get(value_from).map(|t| t.offset).unwrap_or(extent.end);
            Range::new(start, extent.end)
        };
        self.ctx.lists[li].entries.push(InitEntry { index, expr: extent, value });
        up.next_slot.set(index + 1);

        let vagg = match kind {
            ListKind::ArrayDesignator => agg.element(),
            _ => agg
                .strukt
                .and_then(|si| self.ctx.structs[si].members.get(index))
                .map(|m| AggRef {
                    strukt: if m.ptr_depth == 0 { m.struct_ref } else { None },
                    array_depth: m.array_depth,
                })
                .unwrap_or_default(),
        };
        let mut fr = child_frame(up, EntityKind::UnexposedExpr, extent, stmt_slot);
        fr.desig = Cell::new(Some(index));
        fr.agg = Cell::new(vagg);
        self.recurse(e, &fr)
    }

    /// Evaluate an array designator's index: the index expression cursor
    /// when the wrapper exposes one, otherwise the bracketed token.
    fn designated_index(&self, e: Entity<'_>, extent: Range, value_from: usize) -> Result<usize> {
        let children = e.get_children();
        if children.len() >= 2 {
            let v = eval::eval_int(children[0], self.ctx)?;
            if v < 0 {
                return Err(Error::UnsupportedExpression(format!("negative index {}", v)));
            }
            return Ok(v as usize);
        }
        let toks = token::slice_range(&self.ctx.toks, extent);
        let inner = &toks[1..value_from.saturating_sub(2).min(toks.len())];
        if inner.len() == 1 {
            let s = &inner[0].spelling;
            let v = if s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                eval::parse_int_token(s)?
            } else {
                self.ctx
                    .find_enum_constant(s)
                    .ok_or_else(|| Error::UnknownEnumConstant(s.clone()))?
            };
            if v < 0 {
                return Err(Error::UnsupportedExpression(format!("negative index {}", v)));
            }
            return Ok(v as usize);
        }
        Err(Error::UnsupportedExpression("array designator index".into()))
    }

    fn set_list_kind(&mut self, li: usize, kind: ListKind) -> Result<()> {
        let cur = self.ctx.lists[li].kind;
        if cur == ListKind::Irrelevant {
            self.ctx.lists[li].kind = kind;
            Ok(())
        } else if cur == kind {
            Ok(())
        } else {
            Err(Error::MixedDesignators)
        }
    }

    /// A declaration in a `for` header's first clause: hoist it just
    /// before the loop and wrap the whole statement.
    fn for_stmt(&mut self, e: Entity<'_>, up: &Frame<'_>, extent: Range, stmt_slot: bool) -> Result<()> {
        let first = e.get_children().into_iter().next();
        if let Some(first) = first {
            if first.get_kind() == EntityKind::DeclStmt {
                if let Some(d) = token::extent(first) {
                    let semi = self.offset_after_statement(d.end);
                    let close = self.offset_after_statement(extent.end);
                    self.ctx.push_scope_end(close, 1);
                    self.ctx.literals.push(Literal {
                        class: LiteralClass::LoopContext,
                        cast: Range::default(),
                        bracket: None,
                        value: Range::new(d.start, semi),
                        context: Range::new(extent.start, close),
                        agg: AggRef::default(),
                        name: None,
                    });
                }
            }
        }
        let fr = child_frame(up, EntityKind::ForStmt, extent, stmt_slot);
        self.recurse(e, &fr)
    }

    /// A declaration after a statement: wrap it and the block tail.
    fn open_context(&mut self, start: usize, block: &Frame<'_>) {
        let close = block.extent.end.saturating_sub(1);
        self.ctx.push_scope_end(close, 1);
        self.ctx.literals.push(Literal {
            class: LiteralClass::NewContext,
            cast: Range::default(),
            bracket: None,
            value: Range::default(),
            context: Range::new(start, close),
            agg: AggRef::default(),
            name: None,
        });
    }
}
