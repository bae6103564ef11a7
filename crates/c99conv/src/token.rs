//! The file-wide token array and offset arithmetic on it.
//!
//! The whole main file is tokenized exactly once; every later consumer
//! (registrars, designator detection, the emitter) indexes this array by
//! byte offset. Lines and columns are normalized to 0-based here.

use clang::{Entity, TranslationUnit};

use crate::records::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tok {
    pub spelling: String,
    pub line: u32,
    pub col: u32,
    pub offset: usize,
}

/// Tokenize the extent of the translation-unit cursor, i.e. the main file.
pub fn tokenize_unit(tu: &TranslationUnit<'_>) -> Vec<Tok> {
    let root = tu.get_entity();
    let range = match root.get_range() {
        Some(r) => r,
        None => return Vec::new(),
    };
    range
        .tokenize()
        .iter()
        .map(|t| {
            let loc = t.get_location().get_file_location();
            Tok {
                spelling: t.get_spelling(),
                line: loc.line.saturating_sub(1),
                col: loc.column.saturating_sub(1),
                offset: loc.offset as usize,
            }
        })
        .collect()
}

/// Byte-offset extent of a cursor.
pub fn extent(e: Entity<'_>) -> Option<Range> {
    let r = e.get_range()?;
    let start = r.get_start().get_file_location().offset as usize;
    let end = r.get_end().get_file_location().offset as usize;
    Some(Range::new(start, end))
}

/// Offset of a cursor's location. For declarations libclang points this at
/// the declarator identifier, which is what the token scans key on.
pub fn location_offset(e: Entity<'_>) -> Option<usize> {
    Some(e.get_location()?.get_file_location().offset as usize)
}

/// Index of the first token at or past `offset`.
pub fn index_at(toks: &[Tok], offset: usize) -> usize {
    toks.partition_point(|t| t.offset < offset)
}

pub fn slice_range<'a>(toks: &'a [Tok], r: Range) -> &'a [Tok] {
    &toks[index_at(toks, r.start)..index_at(toks, r.end)]
}

pub fn is_comment(spelling: &str) -> bool {
    spelling.starts_with("/*") || spelling.starts_with("//")
}
