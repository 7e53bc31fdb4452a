//! The `mini` grammar for the canopy parser runtime.
//!
//! `mini` is a small statement language: `let` bindings, `if`/`else`,
//! `while`, functions, and expressions with the usual operator precedence.
//! Line comments are ordinary tokens; `/* */` comments nest and are
//! recognised by an external scanner.
//!
//! ```
//! let mut parser = canopy::Parser::new();
//! parser.set_language(&tree_sitter_mini::LANGUAGE.into()).unwrap();
//! let tree = parser.parse("let answer = 6 * 7;", None).unwrap();
//! assert_eq!(
//!     tree.root_node().to_sexp(),
//!     "(source_file (let_statement name: (identifier) value: (binary_expression left: (number) right: (number))))"
//! );
//! ```

use tree_sitter_language::LanguageFn;

mod scanner;

mod parser {
    include!(concat!(env!("OUT_DIR"), "/parser.rs"));
}

/// Returns the address of the grammar's parse tables.
#[no_mangle]
pub extern "C" fn tree_sitter_mini() -> *const () {
    std::ptr::addr_of!(parser::LANGUAGE_DATA).cast()
}

/// The entry point of this grammar, for `canopy::Language::new`.
pub const LANGUAGE: LanguageFn = unsafe { LanguageFn::from_raw(tree_sitter_mini) };

/// The grammar as a [`canopy::Language`].
pub fn language() -> canopy::Language {
    LANGUAGE.into()
}

#[cfg(test)]
mod tests {
    #[test]
    fn can_load_grammar() {
        let mut parser = canopy::Parser::new();
        parser
            .set_language(&super::language())
            .expect("Error loading mini parser");
        assert_eq!(super::language().name(), "mini");
    }
}
