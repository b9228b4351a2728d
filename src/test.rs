use rstest::rstest;

use crate::lexer::token::TokenKind;
use crate::lexer::Tokenizer;
use crate::*;

fn tokens(text: &str) -> Vec<(TokenKind, String)> {
    let source = SourceFile::new("test.c", text);
    let mut tokenizer = Tokenizer::new(&source);
    let mut out = Vec::new();
    loop {
        let token = tokenizer.next();
        if token.kind == TokenKind::Eof {
            break;
        }
        out.push((token.kind, token.text(&source.text).to_string()));
    }
    out
}

fn kinds(text: &str) -> Vec<TokenKind> {
    tokens(text).into_iter().map(|(kind, _)| kind).collect()
}

fn parse(text: &str) -> parser::ParseOutcome {
    let source = SourceFile::new("test.c", text);
    parser::Parser::new(&source).parse_program()
}

fn compile(text: &str) -> String {
    let source = SourceFile::new("test.c", text);
    compile_source(&source, &CompileOptions::default()).expect("compilation")
}

fn compile_no_fold(text: &str) -> String {
    let source = SourceFile::new("test.c", text);
    compile_source(
        &source,
        &CompileOptions {
            fold: false,
            print: false,
        },
    )
    .expect("compilation")
}

// ---- tokenizer ------------------------------------------------------------

#[test]
fn zero_alone_is_a_decimal_literal() {
    let tokens = tokens("0");
    assert_eq!(tokens, vec![(TokenKind::NumericDec, "0".to_string())]);
}

#[rstest]
#[case("0x", TokenKind::Error)]
#[case("0b102", TokenKind::Error)]
#[case("0x1F", TokenKind::NumericHex)]
#[case("0b101", TokenKind::NumericBin)]
#[case("0755", TokenKind::NumericOct)]
#[case("1.5", TokenKind::NumericDouble)]
#[case("1.5f", TokenKind::NumericFloat)]
#[case("123UL", TokenKind::NumericDec)]
fn numeric_literal_classes(#[case] text: &str, #[case] expected: TokenKind) {
    assert_eq!(kinds(text), vec![expected]);
}

#[rstest]
#[case("<<=", TokenKind::LshiftAssign)]
#[case("<<", TokenKind::ShiftLeft)]
#[case("->", TokenKind::Arrow)]
#[case("...", TokenKind::Ellipsis)]
#[case("..", TokenKind::Error)]
#[case("==", TokenKind::EqualityCheck)]
#[case("%=", TokenKind::ModuloAssign)]
fn punctuators_use_maximal_munch(#[case] text: &str, #[case] expected: TokenKind) {
    assert_eq!(kinds(text), vec![expected]);
}

#[test]
fn adjacent_punctuators_split_at_the_longest_prefix() {
    assert_eq!(kinds("+++"), vec![TokenKind::PlusPlus, TokenKind::Plus]);
    assert_eq!(
        kinds("a+b"),
        vec![TokenKind::Identifier, TokenKind::Plus, TokenKind::Identifier]
    );
}

#[test]
fn comments_are_skipped() {
    assert_eq!(
        kinds("a // line\nb"),
        vec![TokenKind::Identifier, TokenKind::Identifier]
    );
    assert_eq!(kinds("/* block */ a"), vec![TokenKind::Identifier]);
}

#[test]
fn unterminated_block_comment_is_an_error() {
    let source = SourceFile::new("test.c", "/* never closed");
    let mut tokenizer = Tokenizer::new(&source);
    assert_eq!(tokenizer.next().kind, TokenKind::Eof);
    assert_eq!(tokenizer.errors, 1);
}

#[test]
fn character_literals() {
    assert_eq!(kinds("'a'"), vec![TokenKind::CharLiteral]);
    assert_eq!(kinds("'\\n'"), vec![TokenKind::CharLiteral]);
    assert_eq!(kinds("'ab'"), vec![TokenKind::Error]);
}

#[test]
fn identifiers_upgrade_to_keywords() {
    assert_eq!(
        kinds("while whilst"),
        vec![TokenKind::While, TokenKind::Identifier]
    );
}

#[test]
fn line_and_column_follow_newlines() {
    let source = SourceFile::new("test.c", "int\n  x;");
    let mut tokenizer = Tokenizer::new(&source);
    let int_token = tokenizer.next();
    assert_eq!((int_token.line, int_token.col), (1, 1));
    let x_token = tokenizer.next();
    assert_eq!((x_token.line, x_token.col), (2, 3));
}

#[test]
fn rewinding_re_emits_the_same_token() {
    let source = SourceFile::new("test.c", "int x = 1;");
    let mut tokenizer = Tokenizer::new(&source);
    let _int = tokenizer.next();
    let x = tokenizer.next();
    let _eq = tokenizer.next();
    tokenizer.rewind_to(x);
    assert_eq!(tokenizer.next(), x);
}

/// Concatenating token splices with single spaces tokenizes to the
/// identical stream.
#[test]
fn token_stream_round_trips() {
    let text = "int main() { int a = 2; /* gone */ return a + 40; } // tail";
    let first = tokens(text);
    let rejoined = first
        .iter()
        .map(|(_, text)| text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(tokens(&rejoined), first);
}

// ---- parsing and context checks -------------------------------------------

#[test]
fn well_formed_program_parses_cleanly() {
    let outcome =
        parse("int add(int a, int b) { return a + b; } int main() { return add(1, 2); }");
    assert_eq!(outcome.tokenize_errors, 0);
    assert_eq!(outcome.parse_errors, 0);
    assert!(outcome.ast.functions.contains_key("add"));
    assert!(outcome.ast.functions.contains_key("main"));
}

#[test]
fn function_vs_variable_disambiguation() {
    let outcome = parse("int x = 1; int *p; int f(void) { return x; }");
    assert_eq!(outcome.parse_errors, 0);
    assert_eq!(outcome.ast.functions.len(), 1);
    let globals = &outcome.ast.scopes.get(outcome.ast.global.scope).symbols;
    assert!(globals.contains_key("x"));
    assert!(globals.contains_key("p"));
}

#[rstest]
#[case("int main() { return x; }")] // undeclared identifier
#[case("int main() { break; }")] // break outside a loop
#[case("int main() { int a; 2 = a; return 0; }")] // invalid lvalue
#[case("int f(int a) { return a; } int main() { return f(1, 2); }")] // arity
#[case("int main() { void v; return 0; }")] // void variable
#[case("int main() { goto done; return 0; }")] // unsupported keyword
#[case("int main() { int a; return a.x; }")] // member of non-struct
#[case("struct A { int x; }; int main() { struct A a; a.y = 1; return 0; }")]
#[case("int main() { int a; int a; return 0; }")] // redefinition
#[case("int main() { return sizeof(void); }")] // size of void
fn bad_programs_are_reported_not_crashed(#[case] text: &str) {
    let outcome = parse(text);
    assert!(outcome.parse_errors > 0, "expected errors for: {text}");
}

#[test]
fn pointer_mismatch_is_a_warning_not_an_error() {
    let outcome = parse("int main() { int a; float *p; p = &a; return 0; }");
    assert_eq!(outcome.parse_errors, 0);
    assert!(outcome.warnings > 0);
}

// ---- layout ---------------------------------------------------------------

#[test]
fn struct_layout_aligns_members_in_source_order() {
    let source = SourceFile::new("test.c", "struct A { char c; int i; long l; };");
    let outcome = parser::Parser::new(&source).parse_program();
    assert_eq!(outcome.parse_errors, 0);
    let mut ast = outcome.ast;
    let lowered = mir::lower::lower(&mut ast, &source);
    assert_eq!(lowered.errors, 0);

    let composite = ast
        .scopes
        .find_composite(ast.global.scope, "A")
        .expect("layout for A");
    assert_eq!(composite.size, 16);
    assert_eq!(composite.alignment, 8);
    assert_eq!(composite.size % composite.alignment, 0);
    let offsets: Vec<u64> = composite.members.values().map(|m| m.offset).collect();
    assert_eq!(offsets, vec![0, 4, 8]);

    insta::assert_yaml_snapshot!(composite.layout(), @r###"
    ---
    size: 16
    alignment: 8
    "###);
}

#[test]
fn union_members_share_offset_zero() {
    let source = SourceFile::new("test.c", "union U { char c; int i; long l; };");
    let outcome = parser::Parser::new(&source).parse_program();
    assert_eq!(outcome.parse_errors, 0);
    let mut ast = outcome.ast;
    let lowered = mir::lower::lower(&mut ast, &source);
    assert_eq!(lowered.errors, 0);

    let composite = ast
        .scopes
        .find_composite(ast.global.scope, "U")
        .expect("layout for U");
    assert_eq!(composite.size, 8);
    assert_eq!(composite.alignment, 8);
    assert!(composite.members.values().all(|m| m.offset == 0));
}

// ---- code generation ------------------------------------------------------

#[test]
fn empty_function_gets_the_standard_frame() {
    let assembly = compile("int f() {}");
    insta::assert_snapshot!(assembly.trim_end(), @r###"
    .section     .rodata
    .section     .data
    .section     .text
    .globl f
f:
    addi sp, sp, -16
    sd ra, 8(sp)
    sd fp, 0(sp)
    mv fp, sp
.f_ep:
    mv sp, fp
    ld fp, 0(sp)
    ld ra, 8(sp)
    addi sp, sp, 16
    ret
    "###);
}

#[test]
fn scenario_arithmetic_and_return() {
    // folds to the exit status 14
    let assembly = compile("int main() { return 2 + 3 * 4; }");
    assert!(assembly.contains("li a0, 14"), "{assembly}");
    assert!(assembly.contains("j .main_ep"), "{assembly}");

    let unfolded = compile_no_fold("int main() { return 2 + 3 * 4; }");
    assert!(unfolded.contains("mul "), "{unfolded}");
    assert!(unfolded.contains("add a0"), "{unfolded}");
}

#[test]
fn scenario_pointers_and_assignment() {
    let assembly = compile("int main() { int a = 2, b = 1, *c = &b; *c = 12; return a + b; }");
    // &b resolves fp-relative, the pointer store is doubleword-sized
    assert!(assembly.contains("addi t0, fp, -8"), "{assembly}");
    assert!(assembly.contains("sd t0, -16(fp)"), "{assembly}");
    // *c = 12 stores through the loaded pointer
    assert!(assembly.contains("sw t0, 0(t1)"), "{assembly}");
}

#[test]
fn scenario_for_loop() {
    let assembly = compile(
        "int main() { int i = 0, s = 0; for (i = 0; i < 5; i = i + 1) { s = s + i; } return s; }",
    );
    assert!(assembly.contains(".while_L0:"), "{assembly}");
    assert!(assembly.contains("j .while_L0"), "{assembly}");
    assert!(assembly.contains("beqz t0, .while_L2"), "{assembly}");
    assert!(assembly.contains(".while_L1:"), "{assembly}");
    assert!(assembly.contains("slt "), "{assembly}");
}

#[test]
fn scenario_struct_member_access() {
    let assembly = compile(
        "struct A { char c; int i; long l; }; \
         int main() { struct A a; a.c = 1; a.i = 2; a.l = 3; return a.c + a.i + a.l; }",
    );
    assert!(assembly.contains("sb t0, -16(fp)"), "{assembly}");
    assert!(assembly.contains("sw t0, -12(fp)"), "{assembly}");
    assert!(assembly.contains("sd t0, -8(fp)"), "{assembly}");
}

#[test]
fn scenario_nested_calls_preserve_caller_saved_registers() {
    let assembly = compile(
        "int add(int a, int b) { return a + b; } \
         int main() { return add(12, add(1, 2)) + 2; }",
    );
    assert_eq!(assembly.matches("call add").count(), 2, "{assembly}");
    // the inner call spills the outer call's first argument
    assert!(assembly.contains("addi sp, sp, -8"), "{assembly}");
    assert!(assembly.contains("sd a0, 0(sp)"), "{assembly}");
    assert!(assembly.contains("ld a0, 0(sp)"), "{assembly}");
    assert!(assembly.contains("mv a1, a0"), "{assembly}");
    // parameters spill to the callee frame
    assert!(assembly.contains("sw a0, -4(fp)"), "{assembly}");
    assert!(assembly.contains("sw a1, -8(fp)"), "{assembly}");
}

#[test]
fn scenario_float_cast() {
    let assembly =
        compile_no_fold("int main() { float x = (float)12 / 15 * 10; return (int)x; }");
    assert!(assembly.contains("fcvt.s.w"), "{assembly}");
    assert!(assembly.contains("fdiv.s"), "{assembly}");
    assert!(assembly.contains("fmul.s"), "{assembly}");
    assert!(assembly.contains("fsw"), "{assembly}");
    assert!(assembly.contains("fcvt.w.s a0"), "{assembly}");
}

#[test]
fn float_literals_are_pooled_in_rodata() {
    let assembly = compile("int main() { float x = 2.5f; float y = 2.5f; return 0; }");
    assert!(assembly.contains(".symbol0:"), "{assembly}");
    // 2.5f encodes as 0x40200000
    assert!(assembly.contains(".word 1075838976"), "{assembly}");
    // deduplicated by spelling
    assert_eq!(assembly.matches(".word 1075838976").count(), 1, "{assembly}");
    assert_eq!(assembly.matches("%hi(.symbol0)").count(), 2, "{assembly}");
}

#[test]
fn while_zero_still_emits_the_loop_skeleton() {
    let assembly = compile("int main() { while (0) { } return 0; }");
    assert!(assembly.contains(".while_L0:"), "{assembly}");
    assert!(assembly.contains("beqz t0, .while_L2"), "{assembly}");
    assert!(assembly.contains("j .while_L0"), "{assembly}");
}

#[test]
fn if_else_chains_share_one_end_label() {
    let assembly = compile(
        "int main() { int a = 1; if (a > 2) { return 1; } else { return 2; } return 3; }",
    );
    assert!(assembly.contains("beqz t0, .if_L1"), "{assembly}");
    assert!(assembly.contains("j .if_L0"), "{assembly}");
    assert!(assembly.contains(".if_L0:"), "{assembly}");
}

#[test]
fn globals_live_in_the_data_section() {
    let assembly = compile("int g = 5; int main() { return g; }");
    assert!(
        assembly.contains("    .section     .data\n    .globl g"),
        "{assembly}"
    );
    assert!(assembly.contains(".word 5"), "{assembly}");
    assert!(assembly.contains("%hi(g)"), "{assembly}");
    assert!(assembly.contains("%lo(g)"), "{assembly}");
}

#[test]
fn array_indexing_scales_by_element_size() {
    let assembly = compile("int main() { int a[3]; a[1] = 5; return a[1]; }");
    assert!(assembly.contains("li t2, 1"), "{assembly}");
    assert!(assembly.contains("mul "), "{assembly}");
    assert!(assembly.contains("sw t0, 0(t1)"), "{assembly}");
}

#[test]
fn struct_assignment_copies_by_chunks() {
    let assembly = compile(
        "struct A { int x; long y; }; \
         int main() { struct A a; struct A b; a.x = 3; a.y = 4; b = a; return b.x; }",
    );
    assert!(assembly.contains("ld t2, 0(t0)"), "{assembly}");
    assert!(assembly.contains("sd t2, 0(t1)"), "{assembly}");
    assert!(assembly.contains("ld t2, 8(t0)"), "{assembly}");
    assert!(assembly.contains("sd t2, 8(t1)"), "{assembly}");
}

#[test]
fn sizeof_resolves_to_a_constant() {
    let assembly = compile("int main() { return sizeof(long); }");
    assert!(assembly.contains("li a0, 8"), "{assembly}");

    let assembly = compile(
        "struct A { char c; int i; long l; }; int main() { return sizeof(struct A); }",
    );
    assert!(assembly.contains("li a0, 16"), "{assembly}");
}

#[test]
fn extern_functions_emit_no_body_but_are_callable() {
    let assembly = compile("int putchar(int c); int main() { putchar(65); return 0; }");
    assert!(assembly.contains("call putchar"), "{assembly}");
    assert!(!assembly.contains("putchar:"), "{assembly}");
}

#[test]
fn compile_errors_stop_the_pipeline() {
    let source = SourceFile::new("test.c", "int main() { return x; }");
    let result = compile_source(&source, &CompileOptions::default());
    assert!(result.is_err());

    let source = SourceFile::new("test.c", "int main() { return 0x; }");
    let result = compile_source(&source, &CompileOptions::default());
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("tokenizer"), "{message}");
}
