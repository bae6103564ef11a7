//! Round-trip tests: parse a C99 source with libclang, convert, and
//! compare the output token stream against the expected C89 rendition.
//!
//! libclang allows one `Clang` instance per process, so every test goes
//! through the shared handle below. When libclang cannot be loaded at
//! runtime the tests skip with a note instead of failing.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use clang::Clang;
use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;

use c99conv::{convert, Options};

struct SyncClang(Option<Clang>);

// `Clang` is marked `!Sync`/`!Send` by the `clang` crate purely to stop
// callers from constructing more than one instance; there is no actual
// shared mutable state to race on here, and all tests still funnel through
// this single handle.
unsafe impl Sync for SyncClang {}
unsafe impl Send for SyncClang {}

static CLANG: Lazy<SyncClang> = Lazy::new(|| SyncClang(Clang::new().ok()));
static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn rewrite_opts(source: &str, ms_compat: bool) -> Option<String> {
    let clang = match CLANG.0.as_ref() {
        Some(c) => c,
        None => {
            eprintln!("libclang unavailable, skipping");
            return None;
        }
    };
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "c99conv_test_{}_{}.c",
        std::process::id(),
        n
    ));
    fs::write(&path, source).unwrap();
    let mut out = Vec::new();
    let result = convert(clang, &path, &mut out, &Options { ms_compat });
    let _ = fs::remove_file(&path);
    result.unwrap();
    Some(String::from_utf8(out).unwrap())
}

fn rewrite(source: &str) -> Option<String> {
    rewrite_opts(source, false)
}

/// Split C source into a comparison token stream, ignoring whitespace.
fn toks(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for c in source.chars() {
        if c.is_alphanumeric() || c == '_' || c == '.' {
            cur.push(c);
        } else {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            if !c.is_whitespace() {
                out.push(c.to_string());
            }
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn assert_converts(source: &str, expected: &str) {
    let out = match rewrite(source) {
        Some(o) => o,
        None => return,
    };
    assert_eq!(toks(&out), toks(expected), "converted output was:\n{}", out);
}

fn assert_converts_ms(source: &str, expected: &str) {
    let out = match rewrite_opts(source, true) {
        Some(o) => o,
        None => return,
    };
    assert_eq!(toks(&out), toks(expected), "converted output was:\n{}", out);
}

#[test]
fn compound_literal_as_matching_initializer_drops_the_cast() {
    assert_converts(
        "typedef struct AVRational { int num, den; } AVRational;\n\
         static AVRational flip(AVRational x)\n\
         {\n\
             AVRational y = (struct AVRational) { x.den, x.num };\n\
             return y;\n\
         }\n",
        "typedef struct AVRational { int num, den; } AVRational;\n\
         static AVRational flip(AVRational x)\n\
         {\n\
             AVRational y = { x.den, x.num };\n\
             return y;\n\
         }\n",
    );
}

#[test]
fn compound_literal_in_expression_becomes_a_temporary() {
    assert_converts(
        "typedef struct AVRational { int num, den; } AVRational;\n\
         int function(AVRational v);\n\
         int call(AVRational x)\n\
         {\n\
             return function((AVRational){ x.num, x.den });\n\
         }\n",
        "typedef struct AVRational { int num, den; } AVRational;\n\
         int function(AVRational v);\n\
         int call(AVRational x)\n\
         {\n\
             { AVRational tmp__0 = { x.num, x.den }; return function(tmp__0); }\n\
         }\n",
    );
}

#[test]
fn file_scope_literal_becomes_a_static_constant() {
    assert_converts(
        "int i;\n\
         int v = ((int[2]){1,2})[i];\n",
        "int i;\n\
         static int tmp__0[2] = { 1, 2 }; int v = (tmp__0)[i];\n",
    );
}

#[test]
fn designated_array_initializer_is_reordered_and_gap_filled() {
    assert_converts(
        "enum { A, B, C };\n\
         int t[] = { [C] = 3, [A] = 1 };\n",
        "enum { A, B, C };\n\
         int t[] = { 1, 0, 3 };\n",
    );
}

#[test]
fn designated_struct_initializer_pads_holes() {
    assert_converts(
        "struct S { int a, b, c; };\n\
         struct S s = { .c = 3, .a = 1 };\n",
        "struct S { int a, b, c; };\n\
         struct S s = { 1, 0, 3 };\n",
    );
}

#[test]
fn union_designator_in_a_function_becomes_assignments() {
    assert_converts(
        "int h(float x)\n\
         {\n\
             union { int i; float f; } s = { .f = x };\n\
             return s.i;\n\
         }\n",
        "int h(float x)\n\
         {\n\
             union { int i; float f; } s; s.f = x; { ;\n\
             return s.i;\n\
         } }\n",
    );
}

#[test]
fn union_designator_at_file_scope_reinterprets_the_bits() {
    assert_converts(
        "union u { int i; float f; };\n\
         union u g = { .f = 1.0 };\n",
        "union u { int i; float f; };\n\
         union u g = { 0x3f800000 };\n",
    );
}

#[test]
fn ms_mode_prefers_the_positional_union_form() {
    assert_converts_ms(
        "int h(void)\n\
         {\n\
             union { int i; float f; } s = { .f = 1.0 };\n\
             return s.i;\n\
         }\n",
        "int h(void)\n\
         {\n\
             union { int i; float f; } s = { 0x3f800000 };\n\
             return s.i;\n\
         }\n",
    );
}

#[test]
fn union_designator_on_the_first_member_goes_positional() {
    assert_converts(
        "union u { int i; float f; };\n\
         union u g = { .i = 5 };\n",
        "union u { int i; float f; };\n\
         union u g = { 5 };\n",
    );
}

#[test]
fn plain_c89_input_is_token_identical() {
    let source = "struct S { int a; char *p; };\n\
                  static int add(int a, int b)\n\
                  {\n\
                      int c = a + b;\n\
                      if (c > 0)\n\
                          return c;\n\
                      return -c;\n\
                  }\n";
    let out = match rewrite(source) {
        Some(o) => o,
        None => return,
    };
    assert_eq!(toks(&out), toks(source), "converted output was:\n{}", out);
}

#[test]
fn declaration_after_statement_opens_a_scope() {
    assert_converts(
        "int k(int x)\n\
         {\n\
             x = x + 1;\n\
             int y = x;\n\
             return y;\n\
         }\n",
        "int k(int x)\n\
         {\n\
             x = x + 1;\n\
             { int y = x;\n\
             return y;\n\
         } }\n",
    );
}

#[test]
fn consecutive_late_declarations_share_one_scope() {
    assert_converts(
        "int k(int x)\n\
         {\n\
             x = x + 1;\n\
             int y = x;\n\
             int z = y;\n\
             return z;\n\
         }\n",
        "int k(int x)\n\
         {\n\
             x = x + 1;\n\
             { int y = x;\n\
             int z = y;\n\
             return z;\n\
         } }\n",
    );
}

#[test]
fn for_header_declaration_is_hoisted() {
    assert_converts(
        "int m(int n)\n\
         {\n\
             int s = 0;\n\
             for (int i = 0; i < n; i++)\n\
                 s += i;\n\
             return s;\n\
         }\n",
        "int m(int n)\n\
         {\n\
             int s = 0;\n\
             { int i = 0; for (; i < n; i++)\n\
                 s += i; }\n\
             return s;\n\
         }\n",
    );
}

#[test]
fn literals_in_a_declaration_stay_alive_to_block_end() {
    assert_converts(
        "typedef struct AVRational { int num, den; } AVRational;\n\
         static AVRational f2(AVRational v);\n\
         static int callf(AVRational x)\n\
         {\n\
             AVRational y = x.num > 0 ? f2((AVRational){ x.num, x.den })\n\
                                      : f2((AVRational){ 0, 0 });\n\
             return y.den;\n\
         }\n",
        "typedef struct AVRational { int num, den; } AVRational;\n\
         static AVRational f2(AVRational v);\n\
         static int callf(AVRational x)\n\
         {\n\
             { AVRational tmp__1 = { 0, 0 }; { AVRational tmp__0 = { x.num, x.den };\n\
             AVRational y = x.num > 0 ? f2(tmp__0)\n\
                                      : f2(tmp__1);\n\
             return y.den;\n\
         } } }\n",
    );
}

#[test]
fn nested_designated_tables_are_normalized_per_level() {
    assert_converts(
        "typedef struct PixFmtInfo { int nb_channels, depth, is_alpha; } PixFmtInfo;\n\
         enum PixelFormat { PIX_FMT_YUV420P, PIX_FMT_RGB24, PIX_FMT_GRAY8 };\n\
         static const PixFmtInfo pix_fmt_info[] = {\n\
             [PIX_FMT_RGB24] = { .nb_channels = 3, .depth = 24 },\n\
             [PIX_FMT_YUV420P] = { .depth = 12, .nb_channels = 3 },\n\
         };\n\
         int main(int argc, char *argv[])\n\
         {\n\
             return pix_fmt_info[argc].depth;\n\
         }\n",
        "typedef struct PixFmtInfo { int nb_channels, depth, is_alpha; } PixFmtInfo;\n\
         enum PixelFormat { PIX_FMT_YUV420P, PIX_FMT_RGB24, PIX_FMT_GRAY8 };\n\
         static const PixFmtInfo pix_fmt_info[] = {\n\
             { 3, 12, 0 },\n\
             { 3, 24, 0 }\n\
         };\n\
         int main(int argc, char *argv[])\n\
         {\n\
             return pix_fmt_info[argc].depth;\n\
         }\n",
    );
}

#[test]
fn designator_indices_accept_constant_arithmetic() {
    assert_converts(
        "enum { A = 1 };\n\
         int t[] = { [A + 1] = 7 };\n",
        "enum { A = 1 };\n\
         int t[] = { 0, 0, 7 };\n",
    );
}

#[test]
fn legacy_colon_designators_are_recognized() {
    assert_converts(
        "struct S { int a, b; };\n\
         struct S s = { b: 2 };\n",
        "struct S { int a, b; };\n\
         struct S s = { 0, 2 };\n",
    );
}

#[test]
fn aggregate_gaps_are_brace_filled() {
    assert_converts(
        "struct V { int xs[2]; int n; };\n\
         struct V v = { .n = 9 };\n",
        "struct V { int xs[2]; int n; };\n\
         struct V v = { { 0 }, 9 };\n",
    );
}

#[test]
fn mixed_designators_are_rejected() {
    let clang = match CLANG.0.as_ref() {
        Some(c) => c,
        None => {
            eprintln!("libclang unavailable, skipping");
            return;
        }
    };
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("c99conv_bad_{}_{}.c", std::process::id(), n));
    fs::write(
        &path,
        "struct S { int a, b; };\nstruct S s = { .a = 1, [1] = 2 };\n",
    )
    .unwrap();
    let mut out = Vec::new();
    let result = convert(clang, &path, &mut out, &Options::default());
    let _ = fs::remove_file(&path);
    match result {
        Err(c99conv::Error::MixedDesignators) => {}
        other => panic!("expected mixed-designator failure, got {:?}", other),
    }
}

#[test]
fn generated_names_stay_unique_across_one_run() {
    let source = "typedef struct R { int a, b; } R;\n\
                  int f(R v);\n\
                  int g(void)\n\
                  {\n\
                      int x = f((R){ 1, 2 });\n\
                      int y = f((R){ 3, 4 });\n\
                      return x + y;\n\
                  }\n";
    let out = match rewrite(source) {
        Some(o) => o,
        None => return,
    };
    assert_eq!(out.matches("tmp__0").count(), 2, "output was:\n{}", out);
    assert_eq!(out.matches("tmp__1").count(), 2, "output was:\n{}", out);
}
