//! Language metadata and parse table access.
//!
//! A [`LanguageData`] is the complete, immutable description of a grammar: the
//! LR parse table, the lexer automaton, symbol and field names, and the
//! external scanner hooks. Generated grammars define one as a set of `static`
//! arrays and hand it out through their `tree_sitter_<name>` entry point; the
//! generator can also build one in memory. A [`Language`] is the cheap, shared
//! handle the rest of the runtime works with.

use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tree_sitter_language::LanguageFn;

use super::error_costs::ERROR_STATE;
use super::lex_table::{CharRange, LexTokenInfo, NfaState};
use super::lexer::ExternalScanner;
use crate::{
    FieldId, LanguageError, StateId, Symbol, LANGUAGE_VERSION, MIN_COMPATIBLE_LANGUAGE_VERSION,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// The end-of-input terminal. Every grammar's symbol `0`.
pub const BUILTIN_SYM_END: Symbol = 0;
pub const BUILTIN_SYM_ERROR: Symbol = u16::MAX;
pub const BUILTIN_SYM_ERROR_REPEAT: Symbol = BUILTIN_SYM_ERROR - 1;

/// The state a parse starts in. State `0` is reserved for error recovery.
pub const START_STATE: StateId = 1;

// ---------------------------------------------------------------------------
// Table types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParseAction {
    Shift {
        state: StateId,
        extra: bool,
        repetition: bool,
    },
    Reduce {
        symbol: Symbol,
        child_count: u8,
        dynamic_precedence: i16,
        production_id: u16,
    },
    Accept,
}

/// One slot of the flat action list. Every run of actions is preceded by a
/// header giving its length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParseActionEntry {
    Header { count: u8, reusable: bool },
    Action(ParseAction),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LexMode {
    pub lex_state: u16,
    pub external_lex_state: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SymbolMetadata {
    pub visible: bool,
    pub named: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MapSlice {
    pub index: u16,
    pub length: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldMapEntry {
    pub field_id: FieldId,
    pub child_index: u8,
    pub inherited: bool,
}

/// Creates a fresh external scanner instance for one parser.
pub type ExternalScannerFactory = fn() -> Box<dyn ExternalScanner>;

/// The complete table set of one grammar.
///
/// All arrays are flat and integer indexed:
///
/// * `parse_table` has `state_count * symbol_count` cells. For a terminal the
///   cell indexes `parse_actions`; for a non-terminal it holds the goto state.
///   `0` means "no entry" in both cases.
/// * `lex_valid_tokens` has one row of `token_count` flags per lex state;
///   `lex_modes[state].lex_state` selects the row.
/// * `external_scanner_states` has one row of `external_token_count` flags per
///   external lex state. Row `0` enables nothing.
/// * `field_names[0]` is unused so that field ids start at 1.
#[derive(Clone, Debug)]
pub struct LanguageData {
    pub abi_version: u32,
    pub name: Cow<'static, str>,
    pub symbol_count: u32,
    pub token_count: u32,
    pub external_token_count: u32,
    pub state_count: u32,
    pub field_count: u32,
    pub production_id_count: u32,
    pub parse_table: Cow<'static, [u16]>,
    pub parse_actions: Cow<'static, [ParseActionEntry]>,
    pub lex_modes: Cow<'static, [LexMode]>,
    pub lex_valid_tokens: Cow<'static, [bool]>,
    pub lex_nfa_states: Cow<'static, [NfaState]>,
    pub lex_char_ranges: Cow<'static, [CharRange]>,
    pub lex_tokens: Cow<'static, [LexTokenInfo]>,
    pub separator_start: Option<u32>,
    pub symbol_names: Cow<'static, [Cow<'static, str>]>,
    pub symbol_metadata: Cow<'static, [SymbolMetadata]>,
    pub field_names: Cow<'static, [Cow<'static, str>]>,
    pub field_map_slices: Cow<'static, [MapSlice]>,
    pub field_map_entries: Cow<'static, [FieldMapEntry]>,
    pub external_scanner_states: Cow<'static, [bool]>,
    pub external_symbol_map: Cow<'static, [Symbol]>,
    pub external_scanner: Option<ExternalScannerFactory>,
}

// ===========================================================================
// Table lookups
// ===========================================================================

impl LanguageData {
    /// Attaches the scanner that produces this grammar's external tokens.
    #[must_use]
    pub fn with_external_scanner(mut self, factory: ExternalScannerFactory) -> Self {
        self.external_scanner = Some(factory);
        self
    }

    /// Raw table value for a (state, symbol) pair.
    #[inline]
    pub(crate) fn lookup(&self, state: StateId, symbol: Symbol) -> u16 {
        if u32::from(symbol) >= self.symbol_count || u32::from(state) >= self.state_count {
            return 0;
        }
        let index = usize::from(state) * self.symbol_count as usize + usize::from(symbol);
        self.parse_table.get(index).copied().unwrap_or(0)
    }

    #[inline]
    pub(crate) fn is_token(&self, symbol: Symbol) -> bool {
        u32::from(symbol) < self.token_count
    }

    /// The actions for a terminal in a state, in resolution order.
    pub(crate) fn actions(&self, state: StateId, symbol: Symbol) -> &[ParseActionEntry] {
        if !self.is_token(symbol) {
            return &[];
        }
        let index = usize::from(self.lookup(state, symbol));
        match self.parse_actions.get(index) {
            Some(ParseActionEntry::Header { count, .. }) => {
                let start = index + 1;
                let end = (start + usize::from(*count)).min(self.parse_actions.len());
                &self.parse_actions[start..end]
            }
            _ => &[],
        }
    }

    /// The action the parser takes: the first one listed.
    #[inline]
    pub(crate) fn first_action(&self, state: StateId, symbol: Symbol) -> Option<ParseAction> {
        self.actions(state, symbol).iter().find_map(|entry| match entry {
            ParseActionEntry::Action(action) => Some(*action),
            ParseActionEntry::Header { .. } => None,
        })
    }

    #[inline]
    pub(crate) fn has_actions(&self, state: StateId, symbol: Symbol) -> bool {
        self.lookup(state, symbol) != 0
    }

    pub(crate) fn is_reusable_entry(&self, state: StateId, symbol: Symbol) -> bool {
        let index = usize::from(self.lookup(state, symbol));
        matches!(
            self.parse_actions.get(index),
            Some(ParseActionEntry::Header { reusable: true, .. })
        )
    }

    /// The state reached after `symbol` is pushed in `state`, or `0`.
    pub(crate) fn next_state(&self, state: StateId, symbol: Symbol) -> StateId {
        if symbol == BUILTIN_SYM_ERROR || symbol == BUILTIN_SYM_ERROR_REPEAT {
            return state;
        }
        if self.is_token(symbol) {
            match self.first_action(state, symbol) {
                Some(ParseAction::Shift { state: next, extra, .. }) => {
                    if extra {
                        state
                    } else {
                        next
                    }
                }
                _ => 0,
            }
        } else {
            self.lookup(state, symbol)
        }
    }

    #[inline]
    pub(crate) fn lex_mode(&self, state: StateId) -> LexMode {
        self.lex_modes
            .get(usize::from(state))
            .copied()
            .unwrap_or_default()
    }

    /// Flags over all terminals for the tokens the lexer may produce.
    pub(crate) fn valid_tokens(&self, lex_state: u16) -> &[bool] {
        let width = self.token_count as usize;
        let start = usize::from(lex_state) * width;
        self.lex_valid_tokens.get(start..start + width).unwrap_or(&[])
    }

    /// Flags over external tokens, or `None` when the scanner is not called.
    pub(crate) fn enabled_external_tokens(&self, external_lex_state: u16) -> Option<&[bool]> {
        if external_lex_state == 0 || self.external_token_count == 0 {
            return None;
        }
        let width = self.external_token_count as usize;
        let start = usize::from(external_lex_state) * width;
        self.external_scanner_states.get(start..start + width)
    }

    pub(crate) fn external_symbol(&self, index: Symbol) -> Option<Symbol> {
        self.external_symbol_map.get(usize::from(index)).copied()
    }

    pub(crate) fn symbol_metadata(&self, symbol: Symbol) -> SymbolMetadata {
        match symbol {
            BUILTIN_SYM_ERROR => SymbolMetadata {
                visible: true,
                named: true,
            },
            BUILTIN_SYM_ERROR_REPEAT => SymbolMetadata::default(),
            _ => self
                .symbol_metadata
                .get(usize::from(symbol))
                .copied()
                .unwrap_or_default(),
        }
    }

    pub(crate) fn symbol_name(&self, symbol: Symbol) -> Option<&str> {
        match symbol {
            BUILTIN_SYM_ERROR => Some("ERROR"),
            BUILTIN_SYM_ERROR_REPEAT => Some("_ERROR"),
            _ => self
                .symbol_names
                .get(usize::from(symbol))
                .map(AsRef::as_ref),
        }
    }

    /// Finds the first visible symbol with the given name, or `0`.
    pub(crate) fn symbol_for_name(&self, name: &str, is_named: bool) -> Symbol {
        if is_named && name == "ERROR" {
            return BUILTIN_SYM_ERROR;
        }
        (0..self.symbol_count as usize)
            .find(|&i| {
                let metadata = self.symbol_metadata[i];
                metadata.visible
                    && metadata.named == is_named
                    && self.symbol_names[i].as_ref() == name
            })
            .map_or(0, |i| i as Symbol)
    }

    /// The field map entries of a production, in child order.
    pub(crate) fn field_map(&self, production_id: u16) -> &[FieldMapEntry] {
        if self.field_count == 0 {
            return &[];
        }
        let Some(slice) = self.field_map_slices.get(usize::from(production_id)) else {
            return &[];
        };
        let start = usize::from(slice.index);
        let end = start + usize::from(slice.length);
        self.field_map_entries.get(start..end).unwrap_or(&[])
    }

    pub(crate) fn field_name(&self, field_id: FieldId) -> Option<&str> {
        if field_id == 0 {
            return None;
        }
        self.field_names
            .get(usize::from(field_id))
            .map(AsRef::as_ref)
    }

    pub(crate) fn field_id_for_name(&self, name: &str) -> Option<FieldId> {
        (1..=self.field_count as usize)
            .find(|&i| self.field_names.get(i).is_some_and(|n| n.as_ref() == name))
            .map(|i| i as FieldId)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Checks that every table has the dimensions the header claims and that
    /// every index stored in a table is in bounds.
    pub fn validate(&self) -> Result<(), LanguageError> {
        if !(MIN_COMPATIBLE_LANGUAGE_VERSION..=LANGUAGE_VERSION).contains(&self.abi_version) {
            return Err(LanguageError::Version(self.abi_version));
        }

        let symbols = self.symbol_count as usize;
        let states = self.state_count as usize;
        let tokens = self.token_count as usize;
        let externals = self.external_token_count as usize;

        let check = |ok: bool, what: &'static str| {
            if ok {
                Ok(())
            } else {
                Err(LanguageError::Malformed(what))
            }
        };

        check(states > usize::from(START_STATE), "state count")?;
        check(tokens > 0 && tokens <= symbols, "token count")?;
        check(symbols < usize::from(BUILTIN_SYM_ERROR_REPEAT), "symbol count")?;
        check(self.parse_table.len() == states * symbols, "parse table size")?;
        check(self.lex_modes.len() == states, "lex mode count")?;
        check(self.symbol_names.len() == symbols, "symbol name count")?;
        check(self.symbol_metadata.len() == symbols, "symbol metadata count")?;
        check(self.lex_tokens.len() == tokens, "lexical token count")?;
        check(self.field_names.len() == self.field_count as usize + 1, "field name count")?;
        check(
            self.field_map_slices.len() == self.production_id_count as usize,
            "field map slice count",
        )?;
        check(
            matches!(self.parse_actions.first(), Some(ParseActionEntry::Header { count: 0, .. })),
            "empty action entry",
        )?;
        check(
            !self.lex_valid_tokens.is_empty() && self.lex_valid_tokens.len() % tokens == 0,
            "lex token rows",
        )?;

        let lex_rows = self.lex_valid_tokens.len() / tokens;
        let external_rows = if externals == 0 {
            1
        } else {
            self.external_scanner_states.len() / externals
        };
        for mode in self.lex_modes.iter() {
            check(usize::from(mode.lex_state) < lex_rows, "lex state")?;
            check(
                usize::from(mode.external_lex_state) < external_rows.max(1),
                "external lex state",
            )?;
        }

        for state in 0..states {
            for symbol in 0..symbols {
                let value = usize::from(self.parse_table[state * symbols + symbol]);
                if symbol < tokens {
                    check(value < self.parse_actions.len(), "action index")?;
                    if let Some(ParseActionEntry::Header { count, .. }) =
                        self.parse_actions.get(value)
                    {
                        check(
                            value + usize::from(*count) < self.parse_actions.len(),
                            "action run length",
                        )?;
                    } else {
                        return Err(LanguageError::Malformed("action header"));
                    }
                } else {
                    check(value < states, "goto state")?;
                }
            }
        }

        for entry in self.parse_actions.iter() {
            match entry {
                ParseActionEntry::Action(ParseAction::Shift { state, .. }) => {
                    check(usize::from(*state) < states, "shift state")?;
                }
                ParseActionEntry::Action(ParseAction::Reduce { symbol, .. }) => {
                    check(
                        usize::from(*symbol) >= tokens && usize::from(*symbol) < symbols,
                        "reduce symbol",
                    )?;
                }
                _ => {}
            }
        }

        for slice in self.field_map_slices.iter() {
            check(
                usize::from(slice.index) + usize::from(slice.length)
                    <= self.field_map_entries.len(),
                "field map slice",
            )?;
        }
        for entry in self.field_map_entries.iter() {
            check(
                entry.field_id != 0 && u32::from(entry.field_id) <= self.field_count,
                "field id",
            )?;
        }

        let nfa_len = self.lex_nfa_states.len();
        for state in self.lex_nfa_states.iter() {
            let in_bounds = match *state {
                NfaState::Advance {
                    ranges_start,
                    ranges_end,
                    next,
                } => {
                    ranges_start <= ranges_end
                        && (ranges_end as usize) <= self.lex_char_ranges.len()
                        && (next as usize) < nfa_len
                }
                NfaState::Split { left, right } => {
                    (left as usize) < nfa_len && (right as usize) < nfa_len
                }
                NfaState::Accept { .. } => true,
            };
            check(in_bounds, "lexer automaton")?;
        }
        for token in self.lex_tokens.iter() {
            check(
                token.start.map_or(true, |start| (start as usize) < nfa_len),
                "token start state",
            )?;
        }
        check(
            self.separator_start.map_or(true, |start| (start as usize) < nfa_len),
            "separator start state",
        )?;

        if externals > 0 {
            check(self.external_symbol_map.len() == externals, "external symbol map")?;
            check(
                self.external_scanner_states.len() % externals == 0,
                "external scanner states",
            )?;
            check(
                self.external_symbol_map
                    .iter()
                    .all(|&symbol| usize::from(symbol) < tokens),
                "external symbol",
            )?;
            if self.external_scanner.is_none() {
                return Err(LanguageError::MissingExternalScanner(self.external_token_count));
            }
        }

        Ok(())
    }
}

// ===========================================================================
// Language handle
// ===========================================================================

/// An opaque, cheaply clonable handle to a grammar's tables.
#[derive(Clone)]
pub struct Language(LanguageRef);

#[derive(Clone)]
enum LanguageRef {
    Static(&'static LanguageData),
    Shared(Arc<LanguageData>),
}

impl Language {
    /// Wraps the table returned by a grammar's `tree_sitter_<name>` function.
    #[must_use]
    pub fn new(builder: LanguageFn) -> Self {
        // SAFETY: a `LanguageFn` for this runtime points at a function that
        // returns the address of a `static LanguageData`, which lives for the
        // rest of the process.
        let data = unsafe { &*(builder.into_raw())().cast::<LanguageData>() };
        Self(LanguageRef::Static(data))
    }

    /// Validates and wraps a table built at runtime.
    pub fn from_data(data: LanguageData) -> Result<Self, LanguageError> {
        data.validate()?;
        Ok(Self(LanguageRef::Shared(Arc::new(data))))
    }

    /// Whether the tables come from a grammar's static data rather than
    /// [`Language::from_data`], which has already validated them.
    pub(crate) fn is_static(&self) -> bool {
        matches!(self.0, LanguageRef::Static(_))
    }

    pub(crate) fn data(&self) -> &LanguageData {
        match &self.0 {
            LanguageRef::Static(data) => data,
            LanguageRef::Shared(data) => data,
        }
    }

    /// The grammar's name, as given in its definition.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.data().name
    }

    #[must_use]
    pub fn abi_version(&self) -> u32 {
        self.data().abi_version
    }

    /// The number of distinct node kinds, including hidden ones.
    #[must_use]
    pub fn node_kind_count(&self) -> usize {
        self.data().symbol_count as usize
    }

    #[must_use]
    pub fn parse_state_count(&self) -> usize {
        self.data().state_count as usize
    }

    #[must_use]
    pub fn node_kind_for_id(&self, id: u16) -> Option<&str> {
        self.data().symbol_name(id)
    }

    /// The numeric id for a node kind name, or `0` if there is none.
    #[must_use]
    pub fn id_for_node_kind(&self, kind: &str, named: bool) -> u16 {
        self.data().symbol_for_name(kind, named)
    }

    #[must_use]
    pub fn node_kind_is_named(&self, id: u16) -> bool {
        self.data().symbol_metadata(id).named
    }

    #[must_use]
    pub fn node_kind_is_visible(&self, id: u16) -> bool {
        self.data().symbol_metadata(id).visible
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.data().field_count as usize
    }

    #[must_use]
    pub fn field_name_for_id(&self, field_id: u16) -> Option<&str> {
        self.data().field_name(field_id)
    }

    #[must_use]
    pub fn field_id_for_name(&self, field_name: impl AsRef<str>) -> Option<FieldId> {
        self.data().field_id_for_name(field_name.as_ref())
    }

    /// The state reached after pushing `symbol` in `state`, or `0`.
    #[must_use]
    pub fn next_state(&self, state: StateId, symbol: Symbol) -> StateId {
        self.data().next_state(state, symbol)
    }

    /// Iterates over the terminals that are valid in a parse state.
    #[must_use]
    pub fn lookahead_iterator(&self, state: StateId) -> LookaheadIterator<'_> {
        LookaheadIterator {
            language: self.data(),
            state,
            symbol: 0,
        }
    }
}

impl Deref for Language {
    type Target = LanguageData;

    fn deref(&self) -> &LanguageData {
        self.data()
    }
}

impl PartialEq for Language {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.data(), other.data())
    }
}

impl Eq for Language {}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Language")
            .field("name", &self.name())
            .field("abi_version", &self.abi_version())
            .field("symbol_count", &self.symbol_count)
            .field("state_count", &self.state_count)
            .finish()
    }
}

impl From<LanguageFn> for Language {
    fn from(builder: LanguageFn) -> Self {
        Self::new(builder)
    }
}

// ---------------------------------------------------------------------------
// Lookahead iteration
// ---------------------------------------------------------------------------

/// Iterator over the valid lookahead terminals of one parse state.
pub struct LookaheadIterator<'a> {
    language: &'a LanguageData,
    state: StateId,
    symbol: u32,
}

impl<'a> LookaheadIterator<'a> {
    #[must_use]
    pub fn current_state(&self) -> StateId {
        self.state
    }

    /// Restarts the iteration at another state.
    pub fn reset_state(&mut self, state: StateId) {
        self.state = state;
        self.symbol = 0;
    }

    /// The names of the remaining symbols.
    pub fn iter_names(self) -> impl Iterator<Item = &'a str> {
        let language = self.language;
        self.filter_map(move |symbol| language.symbol_name(symbol))
    }
}

impl Iterator for LookaheadIterator<'_> {
    type Item = Symbol;

    fn next(&mut self) -> Option<Symbol> {
        if self.state == ERROR_STATE {
            return None;
        }
        while self.symbol < self.language.token_count {
            let symbol = self.symbol as Symbol;
            self.symbol += 1;
            if self.language.has_actions(self.state, symbol) {
                return Some(symbol);
            }
        }
        None
    }
}
