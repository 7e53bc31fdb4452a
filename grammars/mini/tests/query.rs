use canopy::{Node, Point, Query, QueryCursor, QueryErrorKind, StreamingIterator, Tree};
use pretty_assertions::assert_eq;

fn parse(source: &str) -> Tree {
    canopy::parse(source, &tree_sitter_mini::language()).unwrap()
}

fn query(source: &str) -> Query {
    Query::new(&tree_sitter_mini::language(), source).unwrap()
}

fn query_error(source: &str) -> canopy::QueryError {
    Query::new(&tree_sitter_mini::language(), source).unwrap_err()
}

/// Each match as `pattern: @capture=text ...`.
fn matches_with(cursor: &mut QueryCursor, query: &Query, source: &str) -> Vec<String> {
    let tree = parse(source);
    let mut found = Vec::new();
    let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());
    while let Some(m) = matches.next() {
        let captures: String = m
            .captures
            .iter()
            .map(|capture| {
                format!(
                    " @{}={}",
                    query.capture_names()[capture.index as usize],
                    capture.node.utf8_text(source.as_bytes()).unwrap()
                )
            })
            .collect();
        found.push(format!("{}:{captures}", m.pattern_index));
    }
    found
}

fn matches(query_source: &str, source: &str) -> Vec<String> {
    matches_with(&mut QueryCursor::new(), &query(query_source), source)
}

/// Each capture as `@capture=text`, in the order the cursor yields them.
fn captures(query_source: &str, source: &str) -> Vec<String> {
    let query = query(query_source);
    let tree = parse(source);
    let mut cursor = QueryCursor::new();
    let mut found = Vec::new();
    let mut captures = cursor.captures(&query, tree.root_node(), source.as_bytes());
    while let Some((m, index)) = captures.next() {
        let capture = m.captures[*index];
        found.push(format!(
            "@{}={}",
            query.capture_names()[capture.index as usize],
            capture.node.utf8_text(source.as_bytes()).unwrap()
        ));
    }
    found
}

#[test]
fn fields_and_captures() {
    assert_eq!(
        matches(
            "(let_statement name: (identifier) @name value: (_) @value)",
            "let a = 1;\nlet b;\nlet c = d;"
        ),
        ["0: @name=a @value=1", "0: @name=c @value=d"]
    );
    assert_eq!(
        matches(
            "(call_expression function: (identifier) @function arguments: (argument_list (string) @arg))",
            "print(\"hi\", x);\nrun(1);"
        ),
        ["0: @function=print @arg=\"hi\""]
    );
}

#[test]
fn negated_fields() {
    assert_eq!(
        matches(
            "(let_statement name: (identifier) @name !value)",
            "let a = 1;\nlet b;"
        ),
        ["0: @name=b"]
    );
}

#[test]
fn anonymous_literals() {
    assert_eq!(
        matches("(binary_expression operator: \"+\" @op) @sum", "a + b * c;"),
        ["0: @sum=a + b * c @op=+"]
    );
    assert_eq!(
        matches("[\"if\" \"while\"] @keyword", "if a { }\nwhile b { }"),
        ["0: @keyword=if", "0: @keyword=while"]
    );
}

#[test]
fn each_way_of_matching_is_a_separate_match() {
    assert_eq!(
        matches("(argument_list (identifier) @arg)", "f(a, 1, b);"),
        ["0: @arg=a", "0: @arg=b"]
    );
}

#[test]
fn anchors() {
    let source = "f(a, b, c);";
    assert_eq!(
        matches("(argument_list . (_) @first)", source),
        ["0: @first=a"]
    );
    assert_eq!(
        matches("(argument_list (_) @last .)", source),
        ["0: @last=c"]
    );
    assert_eq!(
        matches("(argument_list (identifier) @left . (identifier) @right)", source),
        ["0: @left=a @right=b", "0: @left=b @right=c"]
    );
}

#[test]
fn quantifiers() {
    assert_eq!(
        matches("(argument_list (identifier)+ @args)", "f(a, b, 1, c);\ng(1);"),
        ["0: @args=a @args=b @args=c"]
    );
    assert_eq!(
        matches(
            "(let_statement name: (identifier) @name value: (_)? @value)",
            "let a = 1;\nlet b;"
        ),
        ["0: @name=a @value=1", "0: @name=b"]
    );
    assert_eq!(
        matches("(block (expression_statement)* @statements)", "{ }\n{ a; b; }"),
        ["0:", "0: @statements=a; @statements=b;"]
    );
}

#[test]
fn alternations() {
    assert_eq!(
        matches("[(number) (string)] @literal", "print(1, \"s\", x);"),
        ["0: @literal=1", "0: @literal=\"s\""]
    );
    assert_eq!(
        matches(
            "(let_statement value: [(number) @number (identifier) @name])",
            "let a = 1;\nlet b = a;\nlet c = \"s\";"
        ),
        ["0: @number=1", "0: @name=a"]
    );
}

#[test]
fn sibling_groups() {
    assert_eq!(
        matches(
            "((let_statement) @first . (let_statement) @second)",
            "let a;\nlet b;\nlet c;"
        ),
        [
            "0: @first=let a; @second=let b;",
            "0: @first=let b; @second=let c;"
        ]
    );
}

#[test]
fn error_nodes_can_be_matched() {
    let source = "let = ;\nlet a = 1;";
    let tree = parse(source);
    let mut expected = 0;
    let mut walk = tree.preorder();
    while let Some(node) = walk.next() {
        expected += usize::from(node.is_error());
    }
    assert_eq!(matches("(ERROR) @error", source).len(), expected);
}

#[test]
fn text_predicates() {
    assert_eq!(
        matches("((identifier) @id (#eq? @id \"b\"))", "a; b; c;"),
        ["0: @id=b"]
    );
    assert_eq!(
        matches("((identifier) @id (#not-eq? @id \"b\"))", "a; b; c;"),
        ["0: @id=a", "0: @id=c"]
    );
    assert_eq!(
        matches(
            "(assignment_expression left: (identifier) @left right: (identifier) @right (#eq? @left @right))",
            "a = a;\na = b;"
        ),
        ["0: @left=a @right=a"]
    );
    assert_eq!(
        matches("((identifier) @id (#match? @id \"^[A-Z]\"))", "Foo; bar; Baz;"),
        ["0: @id=Foo", "0: @id=Baz"]
    );
    assert_eq!(
        matches("((identifier) @id (#not-match? @id \"^[A-Z]\"))", "Foo; bar; Baz;"),
        ["0: @id=bar"]
    );
    assert_eq!(
        matches(
            "((identifier) @id (#any-of? @id \"print\" \"input\"))",
            "print(x); input(); y;"
        ),
        ["0: @id=print", "0: @id=input"]
    );
    assert_eq!(
        matches(
            "((identifier) @id (#not-any-of? @id \"print\" \"input\"))",
            "print(x); input(); y;"
        ),
        ["0: @id=x", "0: @id=y"]
    );
}

#[test]
fn quantified_captures_in_predicates() {
    let source = "f(x, x);\ng(x, y);";
    assert_eq!(
        matches(
            "(call_expression function: (identifier) @f (argument_list (identifier)+ @args (#eq? @args \"x\")))",
            source
        ),
        ["0: @f=f @args=x @args=x"]
    );
    assert_eq!(
        matches(
            "(call_expression function: (identifier) @f (argument_list (identifier)+ @args (#any-eq? @args \"x\")))",
            source
        ),
        ["0: @f=f @args=x @args=x", "0: @f=g @args=x @args=y"]
    );
}

#[test]
fn predicates_on_absent_captures_pass() {
    assert_eq!(
        matches(
            "(let_statement name: (identifier) @name value: (_)? @value (#eq? @value \"1\"))",
            "let a = 1;\nlet b = 2;\nlet c;"
        ),
        ["0: @name=a @value=1", "0: @name=c"]
    );
}

#[test]
fn closures_can_provide_text() {
    let source = "a; b; c;";
    let query = query("((identifier) @id (#eq? @id \"c\"))");
    let tree = parse(source);
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, tree.root_node(), |node: Node<'_>| {
        source[node.byte_range()].to_owned()
    });
    let found = matches.next().unwrap();
    assert_eq!(found.captures[0].node.byte_range(), 6..7);
    assert!(matches.next().is_none());
}

#[test]
fn captures_come_out_in_document_order() {
    let query_source = "(let_statement value: (_) @value) @statement\n(identifier) @id";
    let source = "let a = b;";
    assert_eq!(
        matches(query_source, source),
        [
            "0: @statement=let a = b; @value=b",
            "1: @id=a",
            "1: @id=b"
        ]
    );
    assert_eq!(
        captures(query_source, source),
        ["@statement=let a = b;", "@id=a", "@value=b", "@id=b"]
    );
}

#[test]
fn byte_and_point_ranges_restrict_matches() {
    let source = "let a = 1;\nlet b = 2;\nlet c = 3;";
    let query = query("(identifier) @id");

    let mut cursor = QueryCursor::new();
    cursor.set_byte_range(11..21);
    assert_eq!(matches_with(&mut cursor, &query, source), ["0: @id=b"]);

    let mut cursor = QueryCursor::new();
    cursor.set_point_range(Point::new(2, 0)..Point::new(3, 0));
    assert_eq!(matches_with(&mut cursor, &query, source), ["0: @id=c"]);
}

#[test]
fn match_limit_drops_alternatives() {
    let query = query("(argument_list (identifier) @arg)");
    let source = "f(a, b);";

    let mut cursor = QueryCursor::new();
    assert_eq!(matches_with(&mut cursor, &query, source).len(), 2);
    assert!(!cursor.did_exceed_match_limit());

    cursor.set_match_limit(1);
    assert_eq!(
        matches_with(&mut cursor, &query, source),
        ["0: @arg=a"]
    );
    assert!(cursor.did_exceed_match_limit());
}

#[test]
fn disabled_patterns_and_captures() {
    let mut query = query("(let_statement name: (identifier) @name value: (_) @value)\n(number) @number");
    query.disable_capture("value");
    query.disable_pattern(1);
    assert_eq!(
        matches_with(&mut QueryCursor::new(), &query, "let a = 1;"),
        ["0: @name=a"]
    );
}

#[test]
fn properties() {
    let query = query("((identifier) @name (#set! @name role \"callee\"))");
    let property = &query.property_settings(0)[0];
    assert_eq!(&*property.key, "role");
    assert_eq!(property.value.as_deref(), Some("callee"));
    assert_eq!(property.capture_id, Some(0));
}

#[test]
fn invalid_queries() {
    let error = query_error("(let_statement)\n(bogus)");
    assert_eq!(error.kind, QueryErrorKind::NodeType);
    assert_eq!((error.row, error.column, error.offset), (1, 1, 17));
    assert_eq!(error.message, "bogus");

    assert_eq!(
        query_error("(let_statement nam: (identifier))").kind,
        QueryErrorKind::Field
    );
    assert_eq!(
        query_error("((identifier) @a (#eq? @b \"x\"))").kind,
        QueryErrorKind::Capture
    );
    assert_eq!(
        query_error("(identifier (number))").kind,
        QueryErrorKind::Structure
    );
    assert_eq!(query_error("(let_statement").kind, QueryErrorKind::Syntax);
    assert_eq!(query_error("\"fn").kind, QueryErrorKind::Syntax);
    assert_eq!(
        query_error("((identifier) @a (#match? @a \"[\"))").kind,
        QueryErrorKind::Predicate
    );
}
