//! Struct/union, enum and typedef registries.
//!
//! Registration is idempotent: declarations are keyed by the extent start
//! of their cursor (unique per declaration in a single file), named
//! aggregates additionally by name so that a later definition fills in an
//! earlier forward declaration. Typedef proxies keep the raw type-name
//! text and are only chased at lookup time, which is what resolves the
//! typedef-before-struct-body cycles.

use crate::records::AggRef;
use crate::Context;

#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: String,
    /// Textual type: the declaration tokens left of the pointer run.
    pub type_name: String,
    pub ptr_depth: u32,
    pub array_depth: u32,
    /// Index of the member's own aggregate type, when it has one.
    pub struct_ref: Option<usize>,
    pub decl_offset: usize,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    /// Empty for anonymous aggregates.
    pub name: String,
    pub decl_offset: usize,
    pub is_union: bool,
    /// Declaration order; this order defines positional initializers.
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone)]
pub struct EnumConstant {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub decl_offset: usize,
    pub constants: Vec<EnumConstant>,
}

#[derive(Debug, Clone)]
pub enum TypedefBacking {
    Struct(usize),
    Enum(usize),
    /// Raw token run between `typedef` and the new name, plus any array
    /// subscripts that followed the name.
    Proxy { text: String, array_depth: u32 },
}

#[derive(Debug, Clone)]
pub struct TypedefDecl {
    pub name: String,
    pub decl_offset: usize,
    pub backing: TypedefBacking,
}

impl Context {
    pub fn register_struct(&mut self, name: &str, decl_offset: usize, is_union: bool) -> usize {
        if let Some(i) = self.structs.iter().position(|s| s.decl_offset == decl_offset) {
            return i;
        }
        if !name.is_empty() {
            if let Some(i) = self.structs.iter().position(|s| s.name == name) {
                if self.structs[i].members.is_empty() {
                    // definition supersedes the forward declaration
                    self.structs[i].decl_offset = decl_offset;
                }
                return i;
            }
        }
        log::debug!("struct #{}: {:?} union={}", self.structs.len(), name, is_union);
        self.structs.push(StructDecl {
            name: name.to_string(),
            decl_offset,
            is_union,
            members: Vec::new(),
        });
        self.structs.len() - 1
    }

    pub fn find_struct_by_name(&self, name: &str) -> Option<usize> {
        self.structs
            .iter()
            .position(|s| !s.name.is_empty() && s.name == name)
    }

    pub fn find_struct_by_offset(&self, decl_offset: usize) -> Option<usize> {
        self.structs.iter().position(|s| s.decl_offset == decl_offset)
    }

    pub fn register_enum(&mut self, name: &str, decl_offset: usize) -> usize {
        if let Some(i) = self.enums.iter().position(|e| e.decl_offset == decl_offset) {
            return i;
        }
        if !name.is_empty() {
            if let Some(i) = self.enums.iter().position(|e| e.name == name) {
                if self.enums[i].constants.is_empty() {
                    self.enums[i].decl_offset = decl_offset;
                }
                return i;
            }
        }
        self.enums.push(EnumDecl {
            name: name.to_string(),
            decl_offset,
            constants: Vec::new(),
        });
        self.enums.len() - 1
    }

    pub fn find_enum_constant(&self, name: &str) -> Option<i64> {
        for e in &self.enums {
            if let Some(c) = e.constants.iter().find(|c| c.name == name) {
                return Some(c.value);
            }
        }
        None
    }

    pub fn register_typedef(&mut self, name: &str, decl_offset: usize, backing: TypedefBacking) {
        if self
            .typedefs
            .iter()
            .any(|t| t.decl_offset == decl_offset || t.name == name)
        {
            return;
        }
        log::debug!("typedef {:?} -> {:?}", name, backing);
        self.typedefs.push(TypedefDecl {
            name: name.to_string(),
            decl_offset,
            backing,
        });
    }

    /// Chase a type name to the struct declaration it denotes, if any.
    /// Tries the direct struct/enum backing first, then follows proxy text
    /// through the by-name indexes; pointer proxies resolve to nothing.
    pub fn resolve_aggregate(&self, name: &str) -> Option<AggRef> {
        let mut name = name.to_string();
        let mut extra = 0u32;
        // proxy chains are short; the bound guards against cycles
        for _ in 0..16 {
            let td = self.typedefs.iter().find(|t| t.name == name)?;
            match &td.backing {
                TypedefBacking::Struct(i) => {
                    return Some(AggRef {
                        strukt: Some(*i),
                        array_depth: extra,
                    })
                }
                TypedefBacking::Enum(_) => return None,
                TypedefBacking::Proxy { text, array_depth } => {
                    extra += array_depth;
                    let words: Vec<&str> = text
                        .split_whitespace()
                        .filter(|w| !matches!(*w, "const" | "volatile" | "static"))
                        .collect();
                    if words.iter().any(|w| *w == "*") {
                        return None;
                    }
                    match words.as_slice() {
                        ["struct", n] | ["union", n] => {
                            return self.find_struct_by_name(n).map(|i| AggRef {
                                strukt: Some(i),
                                array_depth: extra,
                            })
                        }
                        ["enum", _] => return None,
                        [n] => name = n.to_string(),
                        _ => return None,
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    #[test]
    fn registration_is_idempotent() {
        let mut ctx = Context::new(false);
        let a = ctx.register_struct("AVRational", 10, false);
        let b = ctx.register_struct("AVRational", 10, false);
        assert_eq!(a, b);
        assert_eq!(ctx.structs.len(), 1);
    }

    #[test]
    fn forward_declaration_is_filled_in() {
        let mut ctx = Context::new(false);
        let fwd = ctx.register_struct("S", 5, false);
        let def = ctx.register_struct("S", 40, false);
        assert_eq!(fwd, def);
        assert_eq!(ctx.structs[def].decl_offset, 40);
    }

    #[test]
    fn anonymous_structs_are_keyed_by_cursor() {
        let mut ctx = Context::new(false);
        let a = ctx.register_struct("", 1, false);
        let b = ctx.register_struct("", 2, true);
        assert_ne!(a, b);
        assert!(ctx.structs[b].is_union);
    }

    #[test]
    fn proxy_typedefs_resolve_through_the_struct_index() {
        let mut ctx = Context::new(false);
        let s = ctx.register_struct("AVRational", 0, false);
        ctx.register_typedef(
            "AVRational",
            20,
            TypedefBacking::Proxy {
                text: "struct AVRational".into(),
                array_depth: 0,
            },
        );
        ctx.register_typedef(
            "MyRat",
            60,
            TypedefBacking::Proxy {
                text: "AVRational".into(),
                array_depth: 0,
            },
        );
        let agg = ctx.resolve_aggregate("MyRat").unwrap();
        assert_eq!(agg.strukt, Some(s));
        assert_eq!(agg.array_depth, 0);
    }

    #[test]
    fn pointer_proxies_are_not_aggregates() {
        let mut ctx = Context::new(false);
        ctx.register_struct("S", 0, false);
        ctx.register_typedef(
            "SPtr",
            9,
            TypedefBacking::Proxy {
                text: "struct S *".into(),
                array_depth: 0,
            },
        );
        assert!(ctx.resolve_aggregate("SPtr").is_none());
    }

    #[test]
    fn array_typedefs_accumulate_depth() {
        let mut ctx = Context::new(false);
        ctx.register_typedef(
            "row_t",
            0,
            TypedefBacking::Proxy {
                text: "int".into(),
                array_depth: 1,
            },
        );
        // not struct-backed, so no aggregate reference at all
        assert!(ctx.resolve_aggregate("row_t").is_none());
        let s = ctx.register_struct("S", 50, false);
        ctx.register_typedef(
            "pair_t",
            80,
            TypedefBacking::Proxy {
                text: "struct S".into(),
                array_depth: 2,
            },
        );
        let agg = ctx.resolve_aggregate("pair_t").unwrap();
        assert_eq!(agg.strukt, Some(s));
        assert_eq!(agg.array_depth, 2);
    }

    #[test]
    fn enum_constants_are_found_across_enums() {
        let mut ctx = Context::new(false);
        let e = ctx.register_enum("PixelFormat", 0);
        ctx.enums[e].constants.push(EnumConstant {
            name: "PIX_FMT_RGBA".into(),
            value: 4,
        });
        assert_eq!(ctx.find_enum_constant("PIX_FMT_RGBA"), Some(4));
        assert_eq!(ctx.find_enum_constant("PIX_FMT_NONE"), None);
    }
}
