use canopy::{InputEdit, Parser, ParserConfig, Point, Tree};
use pretty_assertions::assert_eq;

fn point_at(text: &str, byte: usize) -> Point {
    let before = &text[..byte];
    let row = before.matches('\n').count();
    let column = before.rfind('\n').map_or(byte, |newline| byte - newline - 1);
    Point::new(row, column)
}

/// Replaces `old` in `source` with `new`, returning the new text and the
/// matching edit.
fn splice(source: &str, old: &str, new: &str) -> (String, InputEdit) {
    let start = source.find(old).unwrap();
    let old_end = start + old.len();
    let text = format!("{}{new}{}", &source[..start], &source[old_end..]);
    let new_end = start + new.len();
    let edit = InputEdit {
        start_byte: start,
        old_end_byte: old_end,
        new_end_byte: new_end,
        start_position: point_at(source, start),
        old_end_position: point_at(source, old_end),
        new_end_position: point_at(&text, new_end),
    };
    (text, edit)
}

fn parser() -> Parser {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_mini::language()).unwrap();
    parser
}

fn sexp(tree: &Tree) -> String {
    tree.root_node().to_sexp()
}

const SOURCE: &str = "let a = 1;\nlet b = 2;\nlet c = 3;\n";

#[test]
fn unchanged_statements_are_reused() {
    let mut parser = parser();
    let old = parser.parse(SOURCE, None).unwrap();
    let (text, edit) = splice(SOURCE, "2", "f(200)");
    let edited = old.edit(&edit);
    let new = parser.parse(&text, Some(&edited)).unwrap();

    assert_eq!(sexp(&new), sexp(&parser.parse(&text, None).unwrap()));
    assert_eq!(
        sexp(&new),
        "(source_file (let_statement name: (identifier) value: (number)) (let_statement name: (identifier) value: (call_expression function: (identifier) arguments: (argument_list (number)))) (let_statement name: (identifier) value: (number)))"
    );

    let statement = |tree: &Tree, index| tree.root_node().named_child(index).unwrap().id();
    assert_eq!(statement(&new, 0), statement(&old, 0));
    assert_ne!(statement(&new, 1), statement(&old, 1));
    assert_eq!(statement(&new, 2), statement(&old, 2));
    assert_eq!(
        new.root_node().named_child(2).unwrap().start_byte(),
        text.rfind("let").unwrap()
    );
}

#[test]
fn reuse_can_be_disabled() {
    let mut parser = parser();
    parser.set_config(ParserConfig {
        reuse_subtrees: false,
        ..ParserConfig::default()
    });
    let old = parser.parse(SOURCE, None).unwrap();
    let (text, edit) = splice(SOURCE, "2", "22");
    let new = parser.parse(&text, Some(&old.edit(&edit))).unwrap();

    assert_eq!(sexp(&new), sexp(&old));
    assert_ne!(
        new.root_node().named_child(0).unwrap().id(),
        old.root_node().named_child(0).unwrap().id()
    );
}

#[test]
fn editing_leaves_the_original_tree_alone() {
    let old = parser().parse(SOURCE, None).unwrap();
    let (_, edit) = splice(SOURCE, "b = 2", "bee = 2");
    let edited = old.edit(&edit);

    assert!(!old.root_node().has_changes());
    assert!(edited.root_node().has_changes());
    assert!(!edited.root_node().named_child(0).unwrap().has_changes());
    assert!(edited.root_node().named_child(1).unwrap().has_changes());

    let last_before = old.root_node().named_child(2).unwrap();
    let last_after = edited.root_node().named_child(2).unwrap();
    assert_eq!(last_after.start_byte(), last_before.start_byte() + 2);
    assert_eq!(last_after.start_position(), last_before.start_position());
}

#[test]
fn errors_are_introduced_and_repaired() {
    let mut parser = parser();
    let original = parser.parse(SOURCE, None).unwrap();

    let (broken_text, edit) = splice(SOURCE, "2;", "2");
    let broken = parser
        .parse(&broken_text, Some(&original.edit(&edit)))
        .unwrap();
    assert!(broken.root_node().has_error());
    assert_eq!(sexp(&broken), sexp(&parser.parse(&broken_text, None).unwrap()));

    let (fixed_text, edit) = splice(&broken_text, "2", "2;");
    assert_eq!(fixed_text, SOURCE);
    let fixed = parser.parse(&fixed_text, Some(&broken.edit(&edit))).unwrap();
    assert!(!fixed.root_node().has_error());
    assert_eq!(sexp(&fixed), sexp(&original));
}

#[test]
fn changed_ranges_cover_the_edit() {
    let mut parser = parser();
    let old = parser.parse(SOURCE, None).unwrap();
    let (text, edit) = splice(SOURCE, "2", "x + y");
    let edited = old.edit(&edit);
    let new = parser.parse(&text, Some(&edited)).unwrap();

    let ranges = edited.changed_ranges(&new);
    assert!(!ranges.is_empty());
    assert!(ranges[0].start_byte <= edit.start_byte);
    assert!(ranges[ranges.len() - 1].end_byte >= edit.new_end_byte);
    assert!(ranges.windows(2).all(|pair| pair[0].end_byte <= pair[1].start_byte));
    assert!(ranges.iter().all(|range| range.end_byte <= text.len()));
    assert!(ranges.iter().all(|range| range.start_byte >= 10));
}

#[test]
fn reparsing_identical_text_changes_nothing() {
    let mut parser = parser();
    let old = parser.parse(SOURCE, None).unwrap();
    let new = parser.parse(SOURCE, Some(&old)).unwrap();
    assert_eq!(sexp(&new), sexp(&old));
    assert!(old.changed_ranges(&new).is_empty());
}

#[test]
fn nested_comments_survive_edits() {
    let source = "let a; /* x /* y */ z */\nlet b;";
    let mut parser = parser();
    let old = parser.parse(source, None).unwrap();
    let (text, edit) = splice(source, "y */", "y /* w */ */");
    let new = parser.parse(&text, Some(&old.edit(&edit))).unwrap();
    assert_eq!(sexp(&new), sexp(&old));
    assert_eq!(
        sexp(&new),
        "(source_file (let_statement name: (identifier)) (block_comment) (let_statement name: (identifier)))"
    );
    let comment = new.root_node().named_child(1).unwrap();
    assert_eq!(comment.end_byte(), text.find('\n').unwrap());
}

#[test]
fn free_function_applies_edits_in_order() {
    let language = tree_sitter_mini::language();
    let old = canopy::parse(SOURCE, &language).unwrap();

    let (first_text, first) = splice(SOURCE, "1", "one");
    let (second_text, second) = splice(&first_text, "let c = 3;\n", "");
    let new = canopy::parse_incremental(&second_text, &language, &old, &[first, second]).unwrap();

    assert_eq!(
        sexp(&new),
        sexp(&canopy::parse(&second_text, &language).unwrap())
    );
    assert_eq!(new.root_node().named_child_count(), 2);
    assert_eq!(sexp(&old), sexp(&canopy::parse(SOURCE, &language).unwrap()));
}
