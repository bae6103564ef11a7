//! Converts a preprocessed C99 translation unit into C89 source text.
//!
//! The conversion is strictly two-phase: a recursive walk over the clang
//! AST fills the symbol tables and rewrite-record tables, then the
//! emitter streams the original token sequence back out, splicing in the
//! recorded rewrites. Compound literals, designated initializers,
//! mid-block declarations and `for`-header declarations are lowered; the
//! rest of the file passes through with its layout intact enough that
//! line numbers stay usable for back-end diagnostics.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use clang::diagnostic::Severity;
use clang::{Clang, Index};

pub mod emit;
pub mod error;
pub mod eval;
pub mod records;
pub mod symtab;
pub mod token;
pub mod walk;

pub use error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Tolerate MS extensions, target i386-pc-win32, and prefer the
    /// positional union-initializer form MSVC accepts.
    pub ms_compat: bool,
}

/// All conversion state: the token array, the symbol tables, the rewrite
/// records, and the generated-name counter. Tables are append-only while
/// the walker runs and read-only afterwards; everything cross-references
/// by index so the backing vectors may reallocate freely.
pub struct Context {
    pub toks: Vec<token::Tok>,
    pub structs: Vec<symtab::StructDecl>,
    pub enums: Vec<symtab::EnumDecl>,
    pub typedefs: Vec<symtab::TypedefDecl>,
    pub lists: Vec<records::InitList>,
    pub literals: Vec<records::Literal>,
    pub scopes: Vec<records::ScopeEnd>,
    pub ms_compat: bool,
    counter: u32,
}

impl Context {
    pub fn new(ms_compat: bool) -> Self {
        Context {
            toks: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            typedefs: Vec::new(),
            lists: Vec::new(),
            literals: Vec::new(),
            scopes: Vec::new(),
            ms_compat,
            counter: 0,
        }
    }

    /// Temporary names are unique across one conversion.
    pub fn fresh_name(&mut self) -> String {
        let n = self.counter;
        self.counter += 1;
        format!("tmp__{}", n)
    }

    /// Closing braces scheduled at the same offset merge into one record.
    pub fn push_scope_end(&mut self, offset: usize, count: u32) {
        if let Some(s) = self.scopes.iter_mut().find(|s| s.offset == offset) {
            s.count += count;
        } else {
            self.scopes.push(records::ScopeEnd { offset, count });
        }
    }
}

/// Convert `input` and write the C89 rendition to `output`.
pub fn convert_file(clang: &Clang, input: &Path, output: &Path, opts: &Options) -> Result<()> {
    let file = File::create(output)?;
    let mut out = io::BufWriter::new(file);
    convert(clang, input, &mut out, opts)
}

/// Convert `input`, writing to any sink. The parser holds the translation
/// unit for the whole run; tables are dropped together at the end.
pub fn convert<W: Write>(clang: &Clang, input: &Path, out: W, opts: &Options) -> Result<()> {
    let index = Index::new(clang, false, false);
    let mut parser = index.parser(input);
    if opts.ms_compat {
        parser.arguments(&["-target", "i386-pc-win32", "-fms-extensions"]);
    }
    let tu = parser.parse().map_err(|e| Error::Parse(e.to_string()))?;
    for d in tu.get_diagnostics() {
        if matches!(d.get_severity(), Severity::Error | Severity::Fatal) {
            log::warn!("{}", d.get_text());
        }
    }
    let mut ctx = Context::new(opts.ms_compat);
    ctx.toks = token::tokenize_unit(&tu);
    log::debug!("{} tokens", ctx.toks.len());
    walk::build(&mut ctx, &tu)?;
    log::debug!(
        "{} structs, {} enums, {} typedefs, {} lists, {} literals",
        ctx.structs.len(),
        ctx.enums.len(),
        ctx.typedefs.len(),
        ctx.lists.len(),
        ctx.literals.len()
    );
    emit::Emitter::new(&ctx, out).run()
}
