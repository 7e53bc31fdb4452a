#![doc = include_str!("./README.md")]

#[path = "../src_rust/mod.rs"]
mod src_rust;

pub use src_rust::language::{
    ExternalScannerFactory, FieldMapEntry, Language, LanguageData, LexMode, LookaheadIterator,
    MapSlice, ParseAction, ParseActionEntry, SymbolMetadata, BUILTIN_SYM_END, BUILTIN_SYM_ERROR,
    BUILTIN_SYM_ERROR_REPEAT, START_STATE,
};
pub use src_rust::lex_table::{CharRange, LexTokenInfo, NfaState};
pub use src_rust::lexer::{ExternalScanner, Lexer, Logger};
pub use src_rust::node::{Children, Node};
pub use src_rust::parser::{Parser, ParserConfig};
pub use src_rust::point::Point;
pub use src_rust::query::{
    Query, QueryCapture, QueryCaptures, QueryCursor, QueryError, QueryErrorKind, QueryMatch,
    QueryMatches, QueryPredicate, QueryPredicateArg, QueryProperty, TextProvider,
};
pub use src_rust::tree::Tree;
pub use src_rust::tree_cursor::{PreorderWalk, TreeCursor};
pub use streaming_iterator::StreamingIterator;
pub use tree_sitter_language::LanguageFn;

/// The latest ABI version that is supported by the current version of the
/// library.
///
/// When grammars are generated, the generator records the version it targets
/// in the table. Tables outside of
/// [`MIN_COMPATIBLE_LANGUAGE_VERSION`]`..=`[`LANGUAGE_VERSION`] are rejected.
pub const LANGUAGE_VERSION: u32 = 15;

/// The earliest ABI version that is supported by the current version of the
/// library.
pub const MIN_COMPATIBLE_LANGUAGE_VERSION: u32 = 14;

/// A numeric id for a node kind.
pub type Symbol = u16;
/// A numeric id for a parse state.
pub type StateId = u16;
/// A numeric id for a field name. `0` means "no field".
pub type FieldId = u16;

/// A range of positions in a multi-line text document, both in terms of bytes
/// and of rows and columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Range {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_point: Point,
    pub end_point: Point,
}

/// A summary of a change to a text document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InputEdit {
    pub start_byte: usize,
    pub old_end_byte: usize,
    pub new_end_byte: usize,
    pub start_position: Point,
    pub old_end_position: Point,
    pub new_end_position: Point,
}

/// The encoding of source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InputEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// The kind of a message sent to a parser's logger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogType {
    Parse,
    Lex,
}

/// An error that occurred when trying to assign an incompatible [`Language`]
/// to a [`Parser`], or to build one from malformed tables.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LanguageError {
    #[error(
        "incompatible language version {0}, expected a version between {min} and {max}",
        min = MIN_COMPATIBLE_LANGUAGE_VERSION,
        max = LANGUAGE_VERSION
    )]
    Version(u32),
    #[error("malformed language table: {0}")]
    Malformed(&'static str),
    #[error("the language declares {0} external tokens but provides no external scanner")]
    MissingExternalScanner(u32),
}

/// An error that occurred in [`Parser::set_included_ranges`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("incorrect range at index {index}")]
pub struct IncludedRangesError {
    /// The index of the first range that is out of order or inverted.
    pub index: usize,
}

impl Range {
    #[must_use]
    pub fn byte_range(&self) -> std::ops::Range<usize> {
        self.start_byte..self.end_byte
    }
}

fn parser_for(language: &Language) -> Result<Parser, LanguageError> {
    let mut parser = Parser::new();
    parser.set_language(language)?;
    Ok(parser)
}

/// Parses `source` from scratch.
///
/// Parsing never fails on malformed text: syntax errors are recorded in the
/// tree as `ERROR` and `MISSING` nodes. Only an unusable language is an
/// error.
pub fn parse(source: impl AsRef<[u8]>, language: &Language) -> Result<Tree, LanguageError> {
    parser_for(language)?
        .parse(source, None)
        .ok_or(LanguageError::Malformed("parser has no language"))
}

/// Re-parses `source`, the text of `previous` after `edits` were applied to
/// it in order.
///
/// Subtrees of `previous` that the edits did not touch are reused, and the
/// result has the same structure as a fresh [`parse`] of `source`.
/// `previous` itself is left unchanged.
pub fn parse_incremental(
    source: impl AsRef<[u8]>,
    language: &Language,
    previous: &Tree,
    edits: &[InputEdit],
) -> Result<Tree, LanguageError> {
    let edited = edits
        .iter()
        .fold(previous.clone(), |tree, edit| tree.edit(edit));
    parser_for(language)?
        .parse(source, Some(&edited))
        .ok_or(LanguageError::Malformed("parser has no language"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_readable_messages() {
        assert_eq!(
            LanguageError::Version(9).to_string(),
            "incompatible language version 9, expected a version between 14 and 15"
        );
        assert_eq!(
            IncludedRangesError { index: 2 }.to_string(),
            "incorrect range at index 2"
        );
    }

    #[test]
    fn tree_and_language_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Tree>();
        assert_send_sync::<Language>();
        fn assert_send<T: Send>() {}
        assert_send::<Parser>();
    }
}
