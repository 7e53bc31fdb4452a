use canopy::{Language, LanguageError, Parser};
use canopy_generate::grammar::{
    choice, field, pattern, prec_left, prec_right, repeat, seq, string, sym, token,
};
use canopy_generate::{generate, generate_language, render, GenerateError, Grammar, RenderOptions};
use pretty_assertions::assert_eq;

fn arithmetic() -> Grammar {
    let binary = |precedence, operator: &str| {
        prec_left(
            precedence,
            seq([
                field("left", sym("_expression")),
                string(operator),
                field("right", sym("_expression")),
            ]),
        )
    };
    Grammar::new("arithmetic")
        .rule("source", repeat(seq([sym("_expression"), string(";")])))
        .rule(
            "_expression",
            choice([
                sym("binary"),
                sym("power"),
                sym("parenthesized"),
                sym("number"),
            ]),
        )
        .rule("binary", choice([binary(1, "+"), binary(2, "*")]))
        .rule(
            "power",
            prec_right(
                3,
                seq([
                    field("base", sym("_expression")),
                    string("^"),
                    field("exponent", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "parenthesized",
            seq([string("("), sym("_expression"), string(")")]),
        )
        .rule("number", pattern(r"\d+"))
        .rule("comment", token(seq([string("#"), pattern(".*")])))
        .extras([pattern(r"\s"), sym("comment")])
}

fn sexp(language: &Language, source: &str) -> String {
    let mut parser = Parser::new();
    parser.set_language(language).unwrap();
    parser.parse(source, None).unwrap().root_node().to_sexp()
}

#[test]
fn precedence_orders_operators() {
    let language = generate_language(&arithmetic(), None).unwrap();
    assert_eq!(
        sexp(&language, "1 + 2 * 3;"),
        "(source (binary left: (number) right: (binary left: (number) right: (number))))"
    );
    assert_eq!(
        sexp(&language, "1 * 2 + 3;"),
        "(source (binary left: (binary left: (number) right: (number)) right: (number)))"
    );
}

#[test]
fn associativity_groups_equal_operators() {
    let language = generate_language(&arithmetic(), None).unwrap();
    assert_eq!(
        sexp(&language, "1 + 2 + 3;"),
        "(source (binary left: (binary left: (number) right: (number)) right: (number)))"
    );
    assert_eq!(
        sexp(&language, "2 ^ 3 ^ 4;"),
        "(source (power base: (number) exponent: (power base: (number) exponent: (number))))"
    );
}

#[test]
fn hidden_rules_and_repetitions_are_flattened() {
    let language = generate_language(&arithmetic(), None).unwrap();
    assert_eq!(
        sexp(&language, "(1); 2;"),
        "(source (parenthesized (number)) (number))"
    );
    assert_eq!(sexp(&language, ""), "(source)");
}

#[test]
fn token_extras_become_nodes() {
    let language = generate_language(&arithmetic(), None).unwrap();
    assert_eq!(
        sexp(&language, "1 # one\n;"),
        "(source (number) (comment))"
    );
}

#[test]
fn syntax_errors_are_recovered() {
    let language = generate_language(&arithmetic(), None).unwrap();
    let mut parser = Parser::new();
    parser.set_language(&language).unwrap();
    let tree = parser.parse("1 + ; 2;", None).unwrap();
    let root = tree.root_node();
    assert_eq!(root.kind(), "source");
    assert!(root.has_error());
    assert_eq!(root.end_byte(), 8);
}

#[test]
fn language_metadata() {
    let language = generate_language(&arithmetic(), None).unwrap();
    assert_eq!(language.name(), "arithmetic");
    assert_eq!(language.field_count(), 4);
    assert_eq!(language.field_name_for_id(1), Some("base"));
    assert_eq!(language.field_id_for_name("right"), Some(4));

    let number = language.id_for_node_kind("number", true);
    assert_ne!(number, 0);
    assert!(language.node_kind_is_named(number));
    assert!(language.node_kind_is_visible(number));
    let hidden = language.id_for_node_kind("_expression", true);
    assert_eq!(hidden, 0);

    let valid: Vec<&str> = language.lookahead_iterator(1).iter_names().collect();
    assert!(valid.contains(&"number"));
    assert!(valid.contains(&"("));
    assert!(!valid.contains(&"+"));
}

#[test]
fn unresolved_conflicts_prefer_reductions() {
    let grammar = Grammar::new("ambiguous")
        .rule(
            "expr",
            choice([seq([sym("expr"), string("+"), sym("expr")]), sym("x")]),
        )
        .rule("x", string("x"));
    let language = generate_language(&grammar, None).unwrap();
    assert_eq!(
        sexp(&language, "x+x+x"),
        "(expr (expr (expr (x)) (expr (x))) (expr (x)))"
    );
}

#[test]
fn literal_tokens_win_ties_with_patterns() {
    let grammar = Grammar::new("keywords")
        .rule(
            "program",
            repeat(choice([sym("declaration"), sym("identifier")])),
        )
        .rule(
            "declaration",
            seq([string("let"), field("name", sym("identifier"))]),
        )
        .rule("identifier", pattern("[a-z]+"));
    let language = generate_language(&grammar, None).unwrap();
    assert_eq!(
        sexp(&language, "let letter lets"),
        "(program (declaration name: (identifier)) (identifier))"
    );
}

#[test]
fn external_tokens_need_a_scanner() {
    let grammar = Grammar::new("externals")
        .rule("program", repeat(sym("indent")))
        .externals(["indent"]);
    let data = generate(&grammar).unwrap();
    assert_eq!(data.external_token_count, 1);
    assert!(matches!(
        generate_language(&grammar, None),
        Err(GenerateError::Language(LanguageError::MissingExternalScanner(1)))
    ));
}

#[test]
fn malformed_tokens_are_rejected() {
    let empty = Grammar::new("g").rule("a", repeat(sym("b"))).rule("b", pattern("x*"));
    assert!(matches!(generate(&empty), Err(GenerateError::EmptyToken(name)) if name == "b"));

    let nested = Grammar::new("g")
        .rule("a", repeat(sym("b")))
        .rule("b", token(seq([string("x"), sym("a")])));
    assert!(matches!(generate(&nested), Err(GenerateError::SymbolInToken(_))));
}

#[test]
fn rendered_source_defines_a_static_table() {
    let data = generate(&arithmetic()).unwrap();
    let source = render(
        &data,
        &RenderOptions {
            static_name: "ARITHMETIC".to_owned(),
            scanner_path: None,
        },
    );
    assert!(source.contains("pub static ARITHMETIC: ::canopy::LanguageData = {"));
    assert!(source.contains("name: Cow::Borrowed(\"arithmetic\"),"));
    assert!(source.contains(&format!(
        "static PARSE_TABLE: [u16; {}] = [",
        data.parse_table.len()
    )));
    assert!(source.contains("external_scanner: None,"));
    assert!(source.trim_end().ends_with("};"));
}
