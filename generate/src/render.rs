//! Renders a table set as Rust source.
//!
//! The output defines one `static` [`LanguageData`] whose arrays are all
//! `static` too, so a grammar crate can `include!` it from its build output
//! and hand its address out through `tree_sitter_<name>`.

use std::fmt::{self, Write};

use canopy::{LanguageData, NfaState, ParseAction, ParseActionEntry};

#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Name of the generated `static`.
    pub static_name: String,
    /// Path of a `fn() -> Box<dyn ExternalScanner>` that creates the
    /// grammar's external scanner.
    pub scanner_path: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            static_name: "LANGUAGE_DATA".to_owned(),
            scanner_path: None,
        }
    }
}

const ITEMS_PER_LINE: usize = 16;

struct Renderer<'a> {
    out: String,
    data: &'a LanguageData,
}

/// Renders `data` as Rust source.
pub fn render(data: &LanguageData, options: &RenderOptions) -> String {
    let mut renderer = Renderer {
        out: String::new(),
        data,
    };
    // Writing into a `String` cannot fail.
    let _ = renderer.render(options);
    renderer.out
}

fn cow_str(value: &str) -> String {
    format!("Cow::Borrowed({value:?})")
}

impl Renderer<'_> {
    fn render(&mut self, options: &RenderOptions) -> fmt::Result {
        let data = self.data;
        writeln!(
            self.out,
            "// Parse tables for the `{}` grammar, generated by canopy-generate.\n",
            data.name
        )?;
        writeln!(self.out, "#[allow(clippy::unreadable_literal, clippy::too_many_lines)]")?;
        writeln!(
            self.out,
            "pub static {}: ::canopy::LanguageData = {{",
            options.static_name
        )?;
        writeln!(self.out, "    use ::std::borrow::Cow;")?;
        writeln!(
            self.out,
            "    use ::canopy::{{CharRange, FieldMapEntry, LanguageData, LexMode, LexTokenInfo, MapSlice, NfaState, ParseAction, ParseActionEntry, SymbolMetadata}};\n"
        )?;

        self.array("PARSE_TABLE", "u16", &data.parse_table, |value| value.to_string())?;
        self.array("PARSE_ACTIONS", "ParseActionEntry", &data.parse_actions, render_action)?;
        self.array("LEX_MODES", "LexMode", &data.lex_modes, |mode| {
            format!(
                "LexMode {{ lex_state: {}, external_lex_state: {} }}",
                mode.lex_state, mode.external_lex_state
            )
        })?;
        self.array("LEX_VALID_TOKENS", "bool", &data.lex_valid_tokens, |value| {
            value.to_string()
        })?;
        self.array("LEX_NFA_STATES", "NfaState", &data.lex_nfa_states, |state| match *state {
            NfaState::Advance {
                ranges_start,
                ranges_end,
                next,
            } => format!(
                "NfaState::Advance {{ ranges_start: {ranges_start}, ranges_end: {ranges_end}, next: {next} }}"
            ),
            NfaState::Split { left, right } => {
                format!("NfaState::Split {{ left: {left}, right: {right} }}")
            }
            NfaState::Accept { symbol } => format!("NfaState::Accept {{ symbol: {symbol} }}"),
        })?;
        self.array("LEX_CHAR_RANGES", "CharRange", &data.lex_char_ranges, |range| {
            format!("CharRange {{ start: {:?}, end: {:?} }}", range.start, range.end)
        })?;
        self.array("LEX_TOKENS", "LexTokenInfo", &data.lex_tokens, |token| {
            format!(
                "LexTokenInfo {{ start: {:?}, precedence: {}, is_literal: {} }}",
                token.start, token.precedence, token.is_literal
            )
        })?;
        self.array("SYMBOL_NAMES", "Cow<'static, str>", &data.symbol_names, |name| {
            cow_str(name)
        })?;
        self.array("SYMBOL_METADATA", "SymbolMetadata", &data.symbol_metadata, |metadata| {
            format!(
                "SymbolMetadata {{ visible: {}, named: {} }}",
                metadata.visible, metadata.named
            )
        })?;
        self.array("FIELD_NAMES", "Cow<'static, str>", &data.field_names, |name| {
            cow_str(name)
        })?;
        self.array("FIELD_MAP_SLICES", "MapSlice", &data.field_map_slices, |slice| {
            format!("MapSlice {{ index: {}, length: {} }}", slice.index, slice.length)
        })?;
        self.array("FIELD_MAP_ENTRIES", "FieldMapEntry", &data.field_map_entries, |entry| {
            format!(
                "FieldMapEntry {{ field_id: {}, child_index: {}, inherited: {} }}",
                entry.field_id, entry.child_index, entry.inherited
            )
        })?;
        self.array(
            "EXTERNAL_SCANNER_STATES",
            "bool",
            &data.external_scanner_states,
            ToString::to_string,
        )?;
        self.array(
            "EXTERNAL_SYMBOL_MAP",
            "u16",
            &data.external_symbol_map,
            ToString::to_string,
        )?;

        let scanner = options
            .scanner_path
            .as_ref()
            .map_or_else(|| "None".to_owned(), |path| format!("Some({path})"));
        let separator_start = data
            .separator_start
            .map_or_else(|| "None".to_owned(), |start| format!("Some({start})"));

        writeln!(self.out, "    LanguageData {{")?;
        writeln!(self.out, "        abi_version: {},", data.abi_version)?;
        writeln!(self.out, "        name: {},", cow_str(&data.name))?;
        writeln!(self.out, "        symbol_count: {},", data.symbol_count)?;
        writeln!(self.out, "        token_count: {},", data.token_count)?;
        writeln!(self.out, "        external_token_count: {},", data.external_token_count)?;
        writeln!(self.out, "        state_count: {},", data.state_count)?;
        writeln!(self.out, "        field_count: {},", data.field_count)?;
        writeln!(self.out, "        production_id_count: {},", data.production_id_count)?;
        for (field, array) in [
            ("parse_table", "PARSE_TABLE"),
            ("parse_actions", "PARSE_ACTIONS"),
            ("lex_modes", "LEX_MODES"),
            ("lex_valid_tokens", "LEX_VALID_TOKENS"),
            ("lex_nfa_states", "LEX_NFA_STATES"),
            ("lex_char_ranges", "LEX_CHAR_RANGES"),
            ("lex_tokens", "LEX_TOKENS"),
        ] {
            writeln!(self.out, "        {field}: Cow::Borrowed(&{array}),")?;
        }
        writeln!(self.out, "        separator_start: {separator_start},")?;
        for (field, array) in [
            ("symbol_names", "SYMBOL_NAMES"),
            ("symbol_metadata", "SYMBOL_METADATA"),
            ("field_names", "FIELD_NAMES"),
            ("field_map_slices", "FIELD_MAP_SLICES"),
            ("field_map_entries", "FIELD_MAP_ENTRIES"),
            ("external_scanner_states", "EXTERNAL_SCANNER_STATES"),
            ("external_symbol_map", "EXTERNAL_SYMBOL_MAP"),
        ] {
            writeln!(self.out, "        {field}: Cow::Borrowed(&{array}),")?;
        }
        writeln!(self.out, "        external_scanner: {scanner},")?;
        writeln!(self.out, "    }}")?;
        writeln!(self.out, "}};")
    }

    fn array<T>(
        &mut self,
        name: &str,
        ty: &str,
        items: &[T],
        render_item: impl Fn(&T) -> String,
    ) -> fmt::Result {
        writeln!(self.out, "    static {name}: [{ty}; {}] = [", items.len())?;
        for chunk in items.chunks(ITEMS_PER_LINE) {
            let line: Vec<String> = chunk.iter().map(&render_item).collect();
            writeln!(self.out, "        {},", line.join(", "))?;
        }
        writeln!(self.out, "    ];\n")
    }
}

fn render_action(entry: &ParseActionEntry) -> String {
    match *entry {
        ParseActionEntry::Header { count, reusable } => {
            format!("ParseActionEntry::Header {{ count: {count}, reusable: {reusable} }}")
        }
        ParseActionEntry::Action(action) => {
            let action = match action {
                ParseAction::Shift {
                    state,
                    extra,
                    repetition,
                } => format!(
                    "ParseAction::Shift {{ state: {state}, extra: {extra}, repetition: {repetition} }}"
                ),
                ParseAction::Reduce {
                    symbol,
                    child_count,
                    dynamic_precedence,
                    production_id,
                } => format!(
                    "ParseAction::Reduce {{ symbol: {symbol}, child_count: {child_count}, dynamic_precedence: {dynamic_precedence}, production_id: {production_id} }}"
                ),
                ParseAction::Accept => "ParseAction::Accept".to_owned(),
            };
            format!("ParseActionEntry::Action({action})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_render_as_constructors() {
        assert_eq!(
            render_action(&ParseActionEntry::Action(ParseAction::Shift {
                state: 4,
                extra: true,
                repetition: false
            })),
            "ParseActionEntry::Action(ParseAction::Shift { state: 4, extra: true, repetition: false })"
        );
        assert_eq!(
            render_action(&ParseActionEntry::Header {
                count: 2,
                reusable: false
            }),
            "ParseActionEntry::Header { count: 2, reusable: false }"
        );
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(cow_str("\"\\"), r#"Cow::Borrowed("\"\\")"#);
    }
}
