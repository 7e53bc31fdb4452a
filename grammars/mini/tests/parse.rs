use std::sync::{Arc, Mutex};

use canopy::{LogType, Parser, Point, Range, StreamingIterator, Tree};
use pretty_assertions::assert_eq;

fn parse(source: &str) -> Tree {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_mini::language()).unwrap();
    parser.parse(source, None).unwrap()
}

fn sexp(source: &str) -> String {
    parse(source).root_node().to_sexp()
}

#[test]
fn empty_input_has_a_bare_root() {
    let tree = parse("");
    let root = tree.root_node();
    assert_eq!(root.to_sexp(), "(source_file)");
    assert_eq!(root.byte_range(), 0..0);
    assert_eq!(root.child_count(), 0);
    assert!(!root.has_error());
}

#[test]
fn whitespace_only_input_spans_the_document() {
    let tree = parse("  \n\t ");
    let root = tree.root_node();
    assert_eq!(root.to_sexp(), "(source_file)");
    assert_eq!(root.byte_range(), 0..5);
    assert_eq!(root.end_position(), Point::new(1, 2));
}

#[test]
fn statements() {
    assert_eq!(
        sexp("let a = 1;\nlet b;\nreturn;"),
        "(source_file (let_statement name: (identifier) value: (number)) (let_statement name: (identifier)) (return_statement))"
    );
    assert_eq!(
        sexp("while i < 10 { i = i + 1; }"),
        "(source_file (while_statement condition: (binary_expression left: (identifier) right: (number)) body: (block (expression_statement (assignment_expression left: (identifier) right: (binary_expression left: (identifier) right: (number)))))))"
    );
    assert_eq!(
        sexp("if a { } else if b { } else { }"),
        "(source_file (if_statement condition: (identifier) consequence: (block) alternative: (if_statement condition: (identifier) consequence: (block) alternative: (block))))"
    );
}

#[test]
fn operator_precedence() {
    assert_eq!(
        sexp("a + b * c == d;"),
        "(source_file (expression_statement (binary_expression left: (binary_expression left: (identifier) right: (binary_expression left: (identifier) right: (identifier))) right: (identifier))))"
    );
    assert_eq!(
        sexp("-a * f(b, \"s\");"),
        "(source_file (expression_statement (binary_expression left: (unary_expression operand: (identifier)) right: (call_expression function: (identifier) arguments: (argument_list (identifier) (string))))))"
    );
    assert_eq!(
        sexp("a = b = (1 - 2) - 3;"),
        "(source_file (expression_statement (assignment_expression left: (identifier) right: (assignment_expression left: (identifier) right: (binary_expression left: (parenthesized_expression (binary_expression left: (number) right: (number))) right: (number))))))"
    );
}

#[test]
fn keywords_are_not_identifiers() {
    assert_eq!(
        sexp("let letter = iffy;"),
        "(source_file (let_statement name: (identifier) value: (identifier)))"
    );
}

#[test]
fn comments_are_extras() {
    assert_eq!(
        sexp("// leading\nlet a; // trailing\n"),
        "(source_file (line_comment) (let_statement name: (identifier)) (line_comment))"
    );
    assert_eq!(
        sexp("/* outer /* inner */ still outer */ let a;"),
        "(source_file (block_comment) (let_statement name: (identifier)))"
    );
}

#[test]
fn nested_block_comment_is_one_token() {
    let source = "let a; /* one /* two /* three */ */ */";
    let tree = parse(source);
    let comment = tree.root_node().named_child(1).unwrap();
    assert_eq!(comment.kind(), "block_comment");
    assert!(comment.is_extra());
    assert_eq!(comment.byte_range(), 7..source.len());
}

#[test]
fn unterminated_block_comment_is_an_error() {
    let source = "let a; /* never closed";
    let tree = parse(source);
    let root = tree.root_node();
    assert!(root.has_error());
    assert_eq!(root.byte_range(), 0..source.len());
    assert_eq!(root.named_child(0).unwrap().kind(), "let_statement");
}

#[test]
fn unterminated_string_becomes_one_error() {
    let source = "let a = 1;\nprint(a);\n\"unterminated";
    let tree = parse(source);
    let root = tree.root_node();
    assert_eq!(root.kind(), "source_file");
    assert!(root.has_error());
    assert_eq!(root.byte_range(), 0..source.len());

    let mut errors = Vec::new();
    let mut walk = tree.preorder();
    while let Some(node) = walk.next() {
        if node.is_error() {
            errors.push(node.byte_range());
        }
    }
    let quote = source.find('"').unwrap();
    assert_eq!(errors, [quote..source.len()]);

    let statements: Vec<_> = root
        .named_children()
        .filter(|node| !node.is_error())
        .map(|node| node.kind())
        .collect();
    assert_eq!(statements, ["let_statement", "expression_statement"]);
}

#[test]
fn missing_tokens_are_inserted() {
    let tree = parse("let a = 1\nlet b;");
    let root = tree.root_node();
    assert!(root.has_error());
    assert_eq!(root.byte_range(), 0..16);
    assert_eq!(
        root.to_sexp(),
        "(source_file (let_statement name: (identifier) value: (number) (MISSING \";\")) (let_statement name: (identifier)))"
    );
    let semicolon = root.named_child(0).unwrap().child(4).unwrap();
    assert!(semicolon.is_missing());
    assert_eq!(semicolon.byte_range(), 9..9);
}

#[test]
fn node_navigation() {
    let source = "fn add(a, b) { return a + b; }\nadd(1, 2);";
    let tree = parse(source);
    let root = tree.root_node();
    assert_eq!(root.child_count(), 2);
    assert_eq!(root.named_child_count(), 2);

    let function = root.named_child(0).unwrap();
    assert_eq!(function.kind(), "function_definition");
    assert_eq!(
        function
            .child_by_field_name("name")
            .unwrap()
            .utf8_text(source.as_bytes())
            .unwrap(),
        "add"
    );
    assert_eq!(function.field_name_for_child(0), None);
    assert_eq!(function.field_name_for_child(1), Some("name"));
    let parameters = function.child_by_field_name("parameters").unwrap();
    assert_eq!(parameters.named_child_count(), 2);
    assert_eq!(parameters.child_count(), 5);

    let body = function.child_by_field_name("body").unwrap();
    assert_eq!(body.kind(), "block");
    assert_eq!(body.parent().unwrap().id(), function.id());
    assert_eq!(function.parent().unwrap().id(), root.id());
    assert!(root.parent().is_none());

    let call = function.next_sibling().unwrap();
    assert_eq!(call.kind(), "expression_statement");
    assert_eq!(call.start_position(), Point::new(1, 0));
    assert_eq!(call.prev_sibling().unwrap().id(), function.id());
    assert!(call.next_sibling().is_none());

    let one = source.find("(1").unwrap() + 1;
    let number = root.descendant_for_byte_range(one, one + 1).unwrap();
    assert_eq!(number.kind(), "number");
    assert_eq!(number.parent().unwrap().kind(), "argument_list");

    let plus = source.find('+').unwrap();
    assert_eq!(root.descendant_for_byte_range(plus, plus + 1).unwrap().kind(), "+");
    assert_eq!(
        root.named_descendant_for_byte_range(plus, plus + 1)
            .unwrap()
            .kind(),
        "binary_expression"
    );
    assert_eq!(
        root.descendant_for_point_range(Point::new(1, 0), Point::new(1, 3))
            .unwrap()
            .kind(),
        "identifier"
    );
}

#[test]
fn fields_on_repeated_children() {
    let source = "if a { b; } else { c; }";
    let tree = parse(source);
    let statement = tree.root_node().named_child(0).unwrap();
    let blocks: Vec<_> = statement
        .named_children()
        .map(|child| child.kind())
        .collect();
    assert_eq!(blocks, ["identifier", "block", "block"]);
    assert_eq!(statement.children_by_field_name("consequence").len(), 1);
    assert_eq!(
        statement
            .child_by_field_name("alternative")
            .unwrap()
            .start_byte(),
        source.rfind('{').unwrap()
    );
    assert!(statement.child_by_field_name("body").is_none());
}

#[test]
fn tree_cursor_walks_visible_nodes() {
    let tree = parse("fn f(x) { }");
    let mut cursor = tree.walk();
    assert_eq!(cursor.node().kind(), "source_file");
    assert!(cursor.goto_first_child());
    assert_eq!(cursor.node().kind(), "function_definition");
    assert_eq!(cursor.field_name(), None);
    assert_eq!(cursor.depth(), 1);

    assert!(cursor.goto_first_child());
    assert_eq!(cursor.node().kind(), "fn");
    assert!(cursor.goto_next_sibling());
    assert_eq!(cursor.node().kind(), "identifier");
    assert_eq!(cursor.field_name(), Some("name"));
    assert!(cursor.goto_next_sibling());
    assert_eq!(cursor.field_name(), Some("parameters"));
    assert!(cursor.goto_next_sibling());
    assert_eq!(cursor.field_name(), Some("body"));
    assert!(!cursor.goto_next_sibling());

    assert!(cursor.goto_parent());
    assert!(cursor.goto_parent());
    assert_eq!(cursor.node().kind(), "source_file");
    assert!(!cursor.goto_parent());

    assert!(cursor.goto_first_child());
    assert_eq!(cursor.goto_first_child_for_byte(5), Some(2));
    assert_eq!(cursor.node().kind(), "parameter_list");
}

#[test]
fn preorder_walk_visits_every_node() {
    let tree = parse("let a = -1;");
    let mut walk = tree.preorder();
    let mut kinds = Vec::new();
    while let Some(node) = walk.next() {
        kinds.push(node.kind());
    }
    assert_eq!(
        kinds,
        [
            "source_file",
            "let_statement",
            "let",
            "identifier",
            "=",
            "unary_expression",
            "-",
            "number",
            ";",
        ]
    );
    assert_eq!(tree.node_count(), kinds.len());

    walk.restart();
    assert_eq!(walk.next().unwrap().kind(), "source_file");
}

#[test]
fn utf16_input_matches_utf8() {
    let source = "let s = \"h\u{e9}llo\";\nprint(s);";
    let utf8 = parse(source);
    let units: Vec<u16> = source.encode_utf16().collect();

    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_mini::language()).unwrap();
    let little = parser.parse_utf16_le(&units, None).unwrap();
    assert_eq!(little.root_node().to_sexp(), utf8.root_node().to_sexp());
    assert_eq!(little.root_node().end_byte(), units.len() * 2);

    let big = parser.parse_utf16_be(&units, None).unwrap();
    assert_eq!(big.root_node().to_sexp(), utf8.root_node().to_sexp());
}

#[test]
fn invalid_trailing_text_is_recovered() {
    let language = tree_sitter_mini::language();
    let inputs: [&[u8]; 3] = [&[0, 0x80], b"let a = 1;\xff", b"a;\xe2\x82"];
    for bytes in inputs {
        let tree = canopy::parse(bytes, &language).unwrap();
        assert_eq!(tree.root_node().byte_range(), 0..bytes.len());
        assert!(tree.root_node().has_error());
    }

    let mut parser = Parser::new();
    parser.set_language(&language).unwrap();
    let units: [u16; 2] = [0x41, 0xD800];
    let little = parser.parse_utf16_le(units, None).unwrap();
    assert_eq!(little.root_node().byte_range(), 0..4);
    assert!(little.root_node().has_error());
    let big = parser.parse_utf16_be(units, None).unwrap();
    assert_eq!(big.root_node().byte_range(), 0..4);
}

#[test]
fn chunked_input_matches_whole_input() {
    let source = "let s = \"h\u{e9}llo\"; /* a /* b */ */\nwhile s { s = s - 1; }";
    let bytes = source.as_bytes();
    let whole = parse(source);

    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_mini::language()).unwrap();
    let chunked = parser
        .parse_with(
            &mut |offset, _| {
                let start = offset.min(bytes.len());
                &bytes[start..(start + 3).min(bytes.len())]
            },
            None,
        )
        .unwrap();
    assert_eq!(chunked.root_node().to_sexp(), whole.root_node().to_sexp());
    assert_eq!(chunked.root_node().byte_range(), 0..bytes.len());
}

#[test]
fn included_ranges_restrict_parsing() {
    let source = "<< let a = 1; >> markup << a + 1; >>";
    let range_of = |text: &str| {
        let start = source.find(text).unwrap();
        let end = start + text.len();
        Range {
            start_byte: start,
            end_byte: end,
            start_point: Point::new(0, start),
            end_point: Point::new(0, end),
        }
    };
    let ranges = [range_of("let a = 1;"), range_of("a + 1;")];

    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_mini::language()).unwrap();
    parser.set_included_ranges(&ranges).unwrap();
    let tree = parser.parse(source, None).unwrap();
    assert_eq!(
        tree.root_node().to_sexp(),
        "(source_file (let_statement name: (identifier) value: (number)) (expression_statement (binary_expression left: (identifier) right: (number))))"
    );
    assert_eq!(tree.included_ranges(), ranges);

    let overlapping = [ranges[1], ranges[0]];
    assert_eq!(
        parser.set_included_ranges(&overlapping).unwrap_err().index,
        1
    );
    assert_eq!(parser.included_ranges(), ranges);
}

#[test]
fn logger_receives_parse_and_lex_messages() {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);

    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_mini::language()).unwrap();
    parser.set_logger(Some(Box::new(move |log_type: LogType, message: &str| {
        sink.lock().unwrap().push((log_type, message.to_owned()));
    })));
    parser.parse("let a;", None).unwrap();
    parser.set_logger(None);

    let messages = messages.lock().unwrap();
    assert!(messages
        .iter()
        .any(|(kind, message)| *kind == LogType::Parse && message.starts_with("lexed_lookahead")));
    assert!(messages
        .iter()
        .any(|(kind, message)| *kind == LogType::Parse && message == "accept"));
    assert!(messages.iter().any(|(kind, _)| *kind == LogType::Lex));
}

#[test]
fn trees_and_parsers_cross_threads() {
    fn assert_send<T: Send>() {}
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send::<Parser>();
    assert_send_sync::<Tree>();
    assert_send_sync::<canopy::Language>();

    let sources = ["let a = 1;", "if a { b; }", "fn f() { return 1; }"];
    let trees: Vec<Tree> = std::thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter()
            .map(|source| scope.spawn(move || parse(source)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let shared = trees[1].clone();
    let sexp = std::thread::spawn(move || shared.root_node().to_sexp())
        .join()
        .unwrap();
    assert_eq!(sexp, trees[1].root_node().to_sexp());
    for (tree, source) in trees.iter().zip(sources) {
        assert_eq!(tree.root_node().end_byte(), source.len());
        assert!(!tree.root_node().has_error());
    }
}

#[test]
fn dot_graph_output() {
    let tree = parse("a;");
    let mut out = Vec::new();
    tree.print_dot_graph(&mut out).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("digraph tree {"));
    assert!(out.contains("expression_statement"));
    assert!(out.trim_end().ends_with('}'));
}

#[test]
fn dot_graph_shows_unrecognised_characters() {
    let tree = parse("a; $");
    assert!(tree.root_node().has_error());
    let mut out = Vec::new();
    tree.print_dot_graph(&mut out).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("character: '$'"));
}

#[test]
fn free_parse_function() {
    let tree = canopy::parse("b;", &tree_sitter_mini::language()).unwrap();
    assert_eq!(
        tree.root_node().to_sexp(),
        "(source_file (expression_statement (identifier)))"
    );
}
