//! Parse table generation for the canopy runtime.
//!
//! [`generate`] turns a [`Grammar`] into a [`LanguageData`]: symbol numbering,
//! an LALR(1) parse table with precedence-based conflict resolution, a lexer
//! automaton compiled from the token rules, and field maps. The result can be
//! loaded directly with [`Language::from_data`] or written out as Rust source
//! with [`render`] from a grammar crate's build script.

mod build_tables;
mod error;
pub mod grammar;
mod nfa;
mod prepare;
mod render;

use canopy::{ExternalScannerFactory, Language, LanguageData};

pub use error::GenerateError;
pub use grammar::Grammar;
pub use render::{render, RenderOptions};

/// Builds the complete table set for a grammar.
///
/// The result has no external scanner attached; grammars with external
/// tokens need [`LanguageData::with_external_scanner`] before they can be
/// loaded.
pub fn generate(grammar: &Grammar) -> Result<LanguageData, GenerateError> {
    let prepared = prepare::prepare(grammar)?;
    build_tables::build(&prepared)
}

/// Builds a grammar's tables and loads them as a [`Language`].
pub fn generate_language(
    grammar: &Grammar,
    scanner: Option<ExternalScannerFactory>,
) -> Result<Language, GenerateError> {
    let mut data = generate(grammar)?;
    if let Some(scanner) = scanner {
        data = data.with_external_scanner(scanner);
    }
    Ok(Language::from_data(data)?)
}
