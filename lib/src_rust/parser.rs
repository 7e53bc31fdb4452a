//! The LR parse loop.
//!
//! A [`Parser`] drives one deterministic LR automaton over a grammar's tables.
//! Tokens are lexed on demand in the lex mode of the current state. When a
//! previous tree is supplied, unchanged subtrees of it are pushed whole instead
//! of being re-lexed and re-reduced. Syntax errors never abort a parse: they are
//! repaired in place and recorded as `ERROR` and `MISSING` nodes.

use std::fmt;
use std::sync::Arc;

use super::error_costs::MAX_COST_DIFFERENCE;
use super::language::{
    Language, LanguageData, ParseAction, BUILTIN_SYM_END, BUILTIN_SYM_ERROR, START_STATE,
};
use super::lex_table::{self, Scan};
use super::lexer::{ExternalScanner, Lexer, Logger, TextSource, DEFAULT_RANGE};
use super::reusable_node::ReusableNode;
use super::stack::{Stack, StackSummaryEntry};
use super::subtree::{LeafParams, Subtree, TREE_STATE_NONE};
use super::tree::Tree;
use crate::{
    IncludedRangesError, InputEncoding, LanguageError, LogType, Point, Range, StateId, Symbol,
    LANGUAGE_VERSION, MIN_COMPATIBLE_LANGUAGE_VERSION,
};

/// Upper bound on consecutive reductions for one lookahead. Only a malformed
/// table can reach it.
const MAX_REDUCTIONS: usize = 1 << 16;

macro_rules! log {
    ($session:expr, $($arg:tt)*) => {
        $session.lexer.log(LogType::Parse, format_args!($($arg)*))
    };
}

fn symbol_name(language: &LanguageData, symbol: Symbol) -> &str {
    language.symbol_name(symbol).unwrap_or("?")
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Policy knobs for incremental reuse and error recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParserConfig {
    /// Reuse unchanged subtrees of the previous tree.
    pub reuse_subtrees: bool,
    /// Try repairing an error by inserting one zero-width token.
    pub insert_missing_tokens: bool,
    /// How many stack entries error recovery may discard at once.
    pub max_recovery_depth: u32,
    /// How much more than skipping the lookahead a stack pop may cost.
    pub max_cost_difference: u32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            reuse_subtrees: true,
            insert_missing_tokens: true,
            max_recovery_depth: 16,
            max_cost_difference: MAX_COST_DIFFERENCE,
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// A stateful object that parses source text into syntax trees.
///
/// A parser is cheap to create. It holds a language, its external scanner,
/// an optional logger and the included ranges, and can be reused for any
/// number of parses.
pub struct Parser {
    language: Option<Language>,
    scanner: Option<Box<dyn ExternalScanner>>,
    logger: Option<Logger>,
    included_ranges: Vec<Range>,
    config: ParserConfig,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("language", &self.language)
            .field("has_logger", &self.logger.is_some())
            .field("included_ranges", &self.included_ranges)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            language: None,
            scanner: None,
            logger: None,
            included_ranges: vec![DEFAULT_RANGE],
            config: ParserConfig::default(),
        }
    }

    /// Sets the language the parser should use.
    ///
    /// Fails if the language was generated for an incompatible ABI version or
    /// declares external tokens without providing a scanner. Static tables are
    /// checked here, since [`Language::new`] trusts them.
    pub fn set_language(&mut self, language: &Language) -> Result<(), LanguageError> {
        if language.is_static() {
            language.validate()?;
        }
        let version = language.abi_version();
        if !(MIN_COMPATIBLE_LANGUAGE_VERSION..=LANGUAGE_VERSION).contains(&version) {
            return Err(LanguageError::Version(version));
        }
        if language.external_token_count > 0 && language.external_scanner.is_none() {
            return Err(LanguageError::MissingExternalScanner(
                language.external_token_count,
            ));
        }
        self.scanner = language.external_scanner.map(|factory| factory());
        self.language = Some(language.clone());
        Ok(())
    }

    #[must_use]
    pub fn language(&self) -> Option<&Language> {
        self.language.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> ParserConfig {
        self.config
    }

    pub fn set_config(&mut self, config: ParserConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn logger(&self) -> Option<&Logger> {
        self.logger.as_ref()
    }

    /// Sets the callback that receives parse and lex debug messages.
    pub fn set_logger(&mut self, logger: Option<Logger>) {
        self.logger = logger;
    }

    /// Restricts parsing to the given ranges of the document.
    ///
    /// The ranges must be sorted and must not overlap. An empty slice restores
    /// the default of parsing the whole document. On error the previous
    /// ranges stay in effect.
    pub fn set_included_ranges(&mut self, ranges: &[Range]) -> Result<(), IncludedRangesError> {
        let mut previous_end = 0;
        for (index, range) in ranges.iter().enumerate() {
            if range.start_byte < previous_end || range.end_byte < range.start_byte {
                return Err(IncludedRangesError { index });
            }
            previous_end = range.end_byte;
        }
        self.included_ranges = if ranges.is_empty() {
            vec![DEFAULT_RANGE]
        } else {
            ranges.to_vec()
        };
        Ok(())
    }

    #[must_use]
    pub fn included_ranges(&self) -> &[Range] {
        &self.included_ranges
    }

    /// Parses a UTF-8 document.
    ///
    /// Pass the previous tree, edited to match the new text, to parse
    /// incrementally. Returns `None` if no language has been set.
    pub fn parse(&mut self, text: impl AsRef<[u8]>, old_tree: Option<&Tree>) -> Option<Tree> {
        self.parse_source(
            TextSource::Slice(text.as_ref()),
            InputEncoding::Utf8,
            old_tree,
        )
    }

    /// Parses a document stored as little-endian UTF-16 code units.
    pub fn parse_utf16_le(
        &mut self,
        text: impl AsRef<[u16]>,
        old_tree: Option<&Tree>,
    ) -> Option<Tree> {
        let bytes: Vec<u8> = text
            .as_ref()
            .iter()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        self.parse_source(TextSource::Slice(&bytes), InputEncoding::Utf16Le, old_tree)
    }

    /// Parses a document stored as big-endian UTF-16 code units.
    pub fn parse_utf16_be(
        &mut self,
        text: impl AsRef<[u16]>,
        old_tree: Option<&Tree>,
    ) -> Option<Tree> {
        let bytes: Vec<u8> = text
            .as_ref()
            .iter()
            .flat_map(|unit| unit.to_be_bytes())
            .collect();
        self.parse_source(TextSource::Slice(&bytes), InputEncoding::Utf16Be, old_tree)
    }

    /// Parses UTF-8 text supplied in chunks.
    ///
    /// `callback` receives a byte offset and the matching position and
    /// returns the text starting there. An empty chunk ends the document.
    pub fn parse_with<T, F>(&mut self, callback: &mut F, old_tree: Option<&Tree>) -> Option<Tree>
    where
        T: AsRef<[u8]>,
        F: FnMut(usize, Point) -> T,
    {
        self.parse_with_encoding(callback, InputEncoding::Utf8, old_tree)
    }

    /// Parses chunked text in any supported encoding.
    pub fn parse_with_encoding<T, F>(
        &mut self,
        callback: &mut F,
        encoding: InputEncoding,
        old_tree: Option<&Tree>,
    ) -> Option<Tree>
    where
        T: AsRef<[u8]>,
        F: FnMut(usize, Point) -> T,
    {
        let read = move |offset: usize, position: Point, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(callback(offset, position).as_ref());
        };
        self.parse_source(TextSource::Callback(Box::new(read)), encoding, old_tree)
    }

    fn parse_source(
        &mut self,
        source: TextSource<'_>,
        encoding: InputEncoding,
        old_tree: Option<&Tree>,
    ) -> Option<Tree> {
        let language = self.language.clone()?;
        let Self {
            scanner,
            logger,
            included_ranges,
            config,
            ..
        } = self;

        let reusable = old_tree
            .filter(|tree| {
                config.reuse_subtrees
                    && tree.language() == &language
                    && tree.included_ranges() == included_ranges.as_slice()
            })
            .map(|tree| ReusableNode::new(tree.root_subtree().clone()));
        tracing::debug!(
            target: "canopy::parser",
            language = %language.name(),
            incremental = reusable.is_some(),
            "parse"
        );

        let session = ParseSession {
            language: language.data(),
            config: *config,
            lexer: Lexer::new(source, encoding, included_ranges.as_slice(), logger.as_mut()),
            stack: Stack::new(),
            scanner: scanner.as_mut(),
            reusable,
            lex_state: START_STATE,
            last_external_token: None,
        };
        let root = session.run();
        Some(Tree::new(root, language, included_ranges.clone()))
    }
}

// ---------------------------------------------------------------------------
// Parse session
// ---------------------------------------------------------------------------

/// The state of one parse.
struct ParseSession<'a> {
    language: &'a LanguageData,
    config: ParserConfig,
    lexer: Lexer<'a>,
    stack: Stack,
    scanner: Option<&'a mut Box<dyn ExternalScanner>>,
    reusable: Option<ReusableNode>,
    /// The state whose lex mode the next token is scanned in: the target of
    /// the last shift, or the end state of the last reused subtree.
    lex_state: StateId,
    last_external_token: Option<Subtree>,
}

/// The error repairs already tried for the current lookahead.
#[derive(Clone, Copy, Debug, Default)]
struct RecoveryAttempts {
    missing: bool,
    pop: bool,
}

enum Recovery {
    /// Retry the lookahead against the repaired stack.
    Retry(Subtree),
    /// Shift `missing` first, then continue with `token`.
    Missing { missing: Subtree, token: Subtree },
    /// The lookahead was consumed into an error node.
    Skipped,
    Finished(Subtree),
}

enum Next {
    Token(Subtree),
    /// A reused subtree was pushed onto the stack.
    Pushed,
}

impl ParseSession<'_> {
    fn run(mut self) -> Subtree {
        let language = self.language;
        let mut lookahead: Option<Subtree> = None;
        let mut deferred: Option<Subtree> = None;
        let mut attempts = RecoveryAttempts::default();
        let mut reductions = 0;

        loop {
            let token = match lookahead.take().or_else(|| deferred.take()) {
                Some(token) => token,
                None => match self.next_token() {
                    Next::Token(token) => token,
                    Next::Pushed => continue,
                },
            };

            if token.is_error() && token.child_count() == 0 {
                log!(self, "recover_lex_error");
                self.push_error(token);
                attempts = RecoveryAttempts::default();
                reductions = 0;
                continue;
            }

            let state = self.stack.state();
            let action = if reductions < MAX_REDUCTIONS {
                language.first_action(state, token.symbol())
            } else {
                None
            };
            match action {
                Some(ParseAction::Shift { state: next, extra, .. }) => {
                    let is_missing = token.is_missing();
                    self.shift(token, state, next, extra);
                    if !is_missing {
                        attempts = RecoveryAttempts::default();
                    }
                    reductions = 0;
                }
                Some(ParseAction::Reduce {
                    symbol,
                    child_count,
                    dynamic_precedence,
                    production_id,
                }) => {
                    let examined_end = self.stack.position().bytes
                        + token.total_bytes()
                        + token.lookahead_bytes();
                    self.reduce(
                        symbol,
                        child_count,
                        dynamic_precedence,
                        production_id,
                        examined_end,
                    );
                    reductions += 1;
                    lookahead = Some(token);
                }
                Some(ParseAction::Accept) => return self.accept(token),
                None => {
                    reductions = 0;
                    match self.recover(token, &mut attempts) {
                        Recovery::Retry(token) => lookahead = Some(token),
                        Recovery::Missing { missing, token } => {
                            lookahead = Some(missing);
                            deferred = Some(token);
                        }
                        Recovery::Skipped => attempts = RecoveryAttempts::default(),
                        Recovery::Finished(root) => return root,
                    }
                }
            }
        }
    }

    fn push(&mut self, subtree: Subtree, state: StateId) {
        if let Some(token) = subtree.last_external_token() {
            self.last_external_token = Some(token.clone());
        }
        self.stack.push(subtree, state);
    }

    fn shift(&mut self, token: Subtree, state: StateId, next: StateId, extra: bool) {
        if extra {
            log!(self, "shift_extra");
            let token = token.with_extra(true).with_states(state, self.lex_state);
            self.push(token, state);
        } else {
            log!(self, "shift state:{next}");
            let token = token.with_extra(false).with_states(state, next);
            self.lex_state = next;
            self.push(token, next);
        }
    }

    fn reduce(
        &mut self,
        symbol: Symbol,
        child_count: u8,
        dynamic_precedence: i16,
        production_id: u16,
        examined_end: usize,
    ) {
        let language = self.language;
        let slice = self.stack.pop_count(usize::from(child_count));
        let start = self.stack.position();
        let state = self.stack.state();
        let node = Subtree::new_node(symbol, slice.subtrees, production_id, language)
            .with_dynamic_precedence(i32::from(dynamic_precedence))
            .with_parse_state(state)
            .with_examined_end(start.bytes, examined_end);
        let next = language.next_state(state, symbol);
        log!(
            self,
            "reduce sym:{}, child_count:{child_count}",
            symbol_name(language, symbol)
        );
        self.stack.push(node, next);
        for extra in slice.trailing_extras {
            self.stack.push(extra, next);
        }
    }

    /// Performs the reductions `symbol` triggers as the lookahead.
    fn reduce_for_lookahead(&mut self, symbol: Symbol, examined_end: usize) {
        for _ in 0..MAX_REDUCTIONS {
            match self.language.first_action(self.stack.state(), symbol) {
                Some(ParseAction::Reduce {
                    symbol,
                    child_count,
                    dynamic_precedence,
                    production_id,
                }) => self.reduce(
                    symbol,
                    child_count,
                    dynamic_precedence,
                    production_id,
                    examined_end,
                ),
                _ => return,
            }
        }
    }

    /// Builds the root: the start symbol's children plus the extras around
    /// them and the end-of-input token, which holds the trailing padding.
    fn accept(&mut self, eof: Subtree) -> Subtree {
        let language = self.language;
        log!(self, "accept");
        let eof = eof.with_extra(true);
        let mut subtrees = self.stack.pop_all();
        let Some(index) = subtrees.iter().rposition(|tree| !tree.extra()) else {
            subtrees.push(eof);
            return Subtree::new_error_node(subtrees, language).into_root();
        };
        let root = subtrees.remove(index);
        let trailing = subtrees.split_off(index);
        let mut children = subtrees;
        children.extend(root.children().iter().cloned());
        children.extend(trailing);
        children.push(eof);
        Subtree::new_node(root.symbol(), children, root.production_id(), language)
            .with_dynamic_precedence(root.dynamic_precedence())
            .into_root()
    }

    // -----------------------------------------------------------------------
    // Lexing
    // -----------------------------------------------------------------------

    fn next_token(&mut self) -> Next {
        if let Some(next) = self.reuse_node() {
            return next;
        }
        Next::Token(self.lex())
    }

    fn lex(&mut self) -> Subtree {
        let language = self.language;
        let mode = language.lex_mode(self.lex_state);
        let start = self.stack.position();
        self.lexer.reset(start);
        self.lexer.reset_examined();

        let mut depends_on_column = false;
        let mut external = None;
        if let (Some(valid), Some(scanner)) = (
            language.enabled_external_tokens(mode.external_lex_state),
            self.scanner.as_mut(),
        ) {
            log!(self, "lex_external state:{}", mode.external_lex_state);
            let state = self
                .last_external_token
                .as_ref()
                .and_then(Subtree::external_scanner_state);
            scanner.deserialize(state.map_or(&[][..], |state| &state[..]));
            self.lexer.start();
            let found = scanner.scan(&mut self.lexer, valid);
            depends_on_column |= self.lexer.did_get_column();
            if found {
                self.lexer.finish();
                let width = self
                    .lexer
                    .token_end_position()
                    .bytes
                    .saturating_sub(self.lexer.token_start_position().bytes);
                if width > 0 {
                    if let Some(symbol) = language.external_symbol(self.lexer.result_symbol()) {
                        let mut buffer = Vec::new();
                        scanner.serialize(&mut buffer);
                        external = Some((symbol, Arc::<[u8]>::from(buffer)));
                    }
                }
            }
            if external.is_none() {
                self.lexer.reset(start);
            }
        }

        let (symbol, error_char, external_scanner_state) = match external {
            Some((symbol, state)) => (symbol, None, Some(state)),
            None => {
                log!(self, "lex_internal state:{}", mode.lex_state);
                self.lexer.start();
                lex_table::skip_separators(language, &mut self.lexer);
                let first = (!self.lexer.eof()).then(|| self.lexer.lookahead());
                match lex_table::scan(
                    language,
                    &mut self.lexer,
                    language.valid_tokens(mode.lex_state),
                ) {
                    Scan::Token(symbol) => (symbol, None, None),
                    Scan::Error => (BUILTIN_SYM_ERROR, first, None),
                }
            }
        };

        let examined_end = self.lexer.finish();
        depends_on_column |= self.lexer.did_get_column();
        let token_start = self.lexer.token_start_position();
        let token_end = self.lexer.token_end_position();
        let padding = token_start - start;
        let size = token_end - token_start;
        let lookahead_bytes = examined_end.saturating_sub(token_end.bytes);

        if symbol == BUILTIN_SYM_ERROR {
            log!(
                self,
                "lexed_lookahead sym:ERROR, character:{:?}, size:{}",
                error_char.unwrap_or('\0'),
                size.bytes
            );
            Subtree::new_error_leaf(padding, size, lookahead_bytes, error_char, self.lex_state)
        } else {
            log!(
                self,
                "lexed_lookahead sym:{}, size:{}",
                symbol_name(language, symbol),
                size.bytes
            );
            Subtree::new_leaf(
                LeafParams {
                    symbol,
                    padding,
                    size,
                    lookahead_bytes,
                    lex_state: self.lex_state,
                    depends_on_column,
                    external_scanner_state,
                },
                language,
            )
        }
    }

    // -----------------------------------------------------------------------
    // Reuse
    // -----------------------------------------------------------------------

    /// Why the subtree at the current position cannot be reused, if it can't.
    fn reuse_blocker(&self, tree: &Subtree, last_external_token: Option<&Subtree>) -> Option<&'static str> {
        let language = self.language;
        if tree.has_changes() {
            Some("has_changes")
        } else if tree.has_error() || tree.is_missing() {
            Some("is_error")
        } else if tree.size().bytes == 0 {
            Some("is_empty")
        } else if tree.parse_state() == TREE_STATE_NONE
            || tree.first_leaf().lex_state == TREE_STATE_NONE
        {
            Some("no_state")
        } else if language.lex_mode(tree.first_leaf().lex_state) != language.lex_mode(self.lex_state)
        {
            Some("lex_mode")
        } else if tree.child_count() == 0
            && !language.is_reusable_entry(self.stack.state(), tree.symbol())
        {
            Some("conflicted_token")
        } else if !Subtree::external_scanner_state_eq(
            last_external_token,
            self.last_external_token.as_ref(),
        ) {
            Some("external_scanner_state")
        } else {
            None
        }
    }

    /// Offers the previous tree's subtree at the current position. Returns a
    /// reused token, reports a pushed subtree, or `None` to lex normally.
    fn reuse_node(&mut self) -> Option<Next> {
        let language = self.language;
        let position = self.stack.position().bytes;
        loop {
            let reusable = self.reusable.as_mut()?;
            let tree = reusable.tree()?.clone();
            let offset = reusable.byte_offset();
            if offset > position {
                return None;
            }
            if offset < position {
                if offset + tree.total_bytes() <= position || !reusable.descend() {
                    reusable.advance();
                }
                continue;
            }

            let last_external_token = reusable.last_external_token().cloned();
            if let Some(reason) = self.reuse_blocker(&tree, last_external_token.as_ref()) {
                log!(
                    self,
                    "cant_reuse_node_{reason} tree:{}",
                    symbol_name(language, tree.symbol())
                );
                if self.reusable.as_mut().is_some_and(ReusableNode::descend) {
                    continue;
                }
                return None;
            }

            if tree.child_count() == 0 {
                log!(self, "reuse_token symbol:{}", symbol_name(language, tree.symbol()));
                if let Some(reusable) = self.reusable.as_mut() {
                    reusable.advance();
                }
                return Some(Next::Token(tree));
            }

            let leaf = tree.leftmost_leaf();
            let examined_end = position + leaf.total_bytes() + leaf.lookahead_bytes();
            self.reduce_for_lookahead(tree.first_leaf().symbol, examined_end);

            let state = self.stack.state();
            let next = language.next_state(state, tree.symbol());
            if tree.parse_state() == state && next != 0 {
                log!(self, "reuse_node symbol:{}", symbol_name(language, tree.symbol()));
                if let Some(reusable) = self.reusable.as_mut() {
                    reusable.advance();
                }
                if tree.end_state() != TREE_STATE_NONE {
                    self.lex_state = tree.end_state();
                }
                self.push(tree, next);
                return Some(Next::Pushed);
            }

            log!(
                self,
                "cant_reuse_node_state tree:{}",
                symbol_name(language, tree.symbol())
            );
            if let Some(reusable) = self.reusable.as_mut() {
                reusable.descend();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Error recovery
    // -----------------------------------------------------------------------

    /// Applies the reductions `symbol` would trigger to a copy of the state
    /// stack and returns the action that follows them.
    fn simulate_reductions(&self, states: &mut Vec<StateId>, symbol: Symbol) -> Option<ParseAction> {
        let language = self.language;
        for _ in 0..MAX_REDUCTIONS {
            let state = *states.last()?;
            match language.first_action(state, symbol)? {
                ParseAction::Reduce {
                    symbol: lhs,
                    child_count,
                    ..
                } => {
                    let count = usize::from(child_count);
                    if count >= states.len() {
                        return None;
                    }
                    states.truncate(states.len() - count);
                    let next = language.next_state(*states.last()?, lhs);
                    if next == 0 {
                        return None;
                    }
                    states.push(next);
                }
                action => return Some(action),
            }
        }
        None
    }

    fn is_viable(&self, states: &[StateId], symbol: Symbol) -> bool {
        let mut states = states.to_vec();
        matches!(
            self.simulate_reductions(&mut states, symbol),
            Some(ParseAction::Shift { .. } | ParseAction::Accept)
        )
    }

    /// The first terminal that, shifted now, lets `lookahead` continue.
    fn find_missing_token(&self, lookahead: Symbol) -> Option<Symbol> {
        let language = self.language;
        let base = self.stack.states_without_extras();
        (1..language.token_count as Symbol)
            .filter(|symbol| !language.external_symbol_map.contains(symbol))
            .find(|&symbol| {
                let mut states = base.clone();
                match self.simulate_reductions(&mut states, symbol) {
                    Some(ParseAction::Shift {
                        state,
                        extra: false,
                        ..
                    }) => {
                        states.push(state);
                        self.is_viable(&states, lookahead)
                    }
                    _ => false,
                }
            })
    }

    /// The shallowest stack entry below which `lookahead` becomes valid.
    fn find_viable_depth(&self, lookahead: Symbol) -> Option<StackSummaryEntry> {
        let summary = self.stack.summarize(self.config.max_recovery_depth);
        let states = self.stack.states_without_extras();
        summary.into_iter().skip(1).find(|entry| {
            let depth = entry.depth as usize;
            self.is_viable(&states[..states.len() - depth], lookahead)
        })
    }

    /// The subtrees `pop_depth(depth)` would remove, without removing them.
    fn peek_depth(&self, depth: usize) -> Vec<Subtree> {
        let entries = self.stack.entries();
        let mut remaining = depth;
        let mut start = entries.len();
        while remaining > 0 && start > 0 {
            start -= 1;
            if !entries[start].subtree.extra() {
                remaining -= 1;
            }
        }
        entries[start..]
            .iter()
            .map(|entry| entry.subtree.clone())
            .collect()
    }

    fn recover(&mut self, token: Subtree, attempts: &mut RecoveryAttempts) -> Recovery {
        let language = self.language;
        let symbol = token.symbol();
        log!(self, "detect_error lookahead:{}", symbol_name(language, symbol));

        if self.config.insert_missing_tokens && !attempts.missing {
            attempts.missing = true;
            if let Some(missing) = self.find_missing_token(symbol) {
                log!(
                    self,
                    "recover_with_missing symbol:{}, lookahead:{}",
                    symbol_name(language, missing),
                    symbol_name(language, symbol)
                );
                let missing = Subtree::new_missing_leaf(missing, 0, language);
                return Recovery::Missing { missing, token };
            }
        }

        if !attempts.pop {
            attempts.pop = true;
            if let Some(target) = self.find_viable_depth(symbol) {
                let depth = target.depth as usize;
                let pop_cost = Subtree::new_error_node(self.peek_depth(depth), language).error_cost();
                let skip_cost = Subtree::new_error_node(vec![token.clone()], language).error_cost();
                if symbol == BUILTIN_SYM_END
                    || pop_cost <= skip_cost.saturating_add(self.config.max_cost_difference)
                {
                    let popped = self.stack.pop_depth(depth);
                    log!(
                        self,
                        "recover_to_previous state:{}, depth:{depth}",
                        target.state
                    );
                    self.push_error(Subtree::new_error_node(popped, language));
                    self.lex_state = self.stack.state();
                    return Recovery::Retry(token);
                }
            }
        }

        if symbol == BUILTIN_SYM_END {
            log!(self, "recover_eof");
            let mut subtrees = self.stack.pop_all();
            subtrees.push(token.with_extra(true));
            return Recovery::Finished(Subtree::new_error_node(subtrees, language).into_root());
        }

        log!(self, "skip_token symbol:{}", symbol_name(language, symbol));
        self.push_error(Subtree::new_error_node(vec![token], language));
        self.lex_state = self.stack.state();
        Recovery::Skipped
    }

    /// Pushes an error as an extra, merging it into an error right below.
    fn push_error(&mut self, error: Subtree) {
        let language = self.language;
        let error = if self
            .stack
            .top()
            .is_some_and(|top| top.is_error() && top.extra())
        {
            let mut children = Vec::with_capacity(2);
            children.extend(self.stack.pop());
            children.push(error);
            Subtree::new_error_node(children, language)
        } else {
            error
        };
        let state = self.stack.state();
        let error = error.with_extra(true).with_states(state, self.lex_state);
        self.push(error, state);
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use tree_sitter_language::LanguageFn;

    use super::*;

    fn range(start_byte: usize, end_byte: usize) -> Range {
        Range {
            start_byte,
            end_byte,
            start_point: Point::new(0, start_byte),
            end_point: Point::new(0, end_byte),
        }
    }

    #[test]
    fn default_config() {
        let config = ParserConfig::default();
        assert!(config.reuse_subtrees);
        assert!(config.insert_missing_tokens);
        assert_eq!(config.max_recovery_depth, 16);
        assert_eq!(config.max_cost_difference, 1600);
    }

    #[test]
    fn included_ranges_must_be_ordered() {
        let mut parser = Parser::new();
        assert_eq!(
            parser.set_included_ranges(&[range(0, 4), range(2, 6)]),
            Err(IncludedRangesError { index: 1 })
        );
        assert_eq!(
            parser.set_included_ranges(&[range(5, 4)]),
            Err(IncludedRangesError { index: 0 })
        );
        assert_eq!(parser.included_ranges(), &[DEFAULT_RANGE]);

        parser
            .set_included_ranges(&[range(0, 4), range(4, 6)])
            .unwrap();
        assert_eq!(parser.included_ranges().len(), 2);
        parser.set_included_ranges(&[]).unwrap();
        assert_eq!(parser.included_ranges(), &[DEFAULT_RANGE]);
    }

    static TRUNCATED: LanguageData = LanguageData {
        abi_version: LANGUAGE_VERSION,
        name: Cow::Borrowed("truncated"),
        symbol_count: 2,
        token_count: 2,
        external_token_count: 0,
        state_count: 2,
        field_count: 0,
        production_id_count: 0,
        parse_table: Cow::Borrowed(&[0, 0, 0]),
        parse_actions: Cow::Borrowed(&[]),
        lex_modes: Cow::Borrowed(&[]),
        lex_valid_tokens: Cow::Borrowed(&[]),
        lex_nfa_states: Cow::Borrowed(&[]),
        lex_char_ranges: Cow::Borrowed(&[]),
        lex_tokens: Cow::Borrowed(&[]),
        separator_start: None,
        symbol_names: Cow::Borrowed(&[]),
        symbol_metadata: Cow::Borrowed(&[]),
        field_names: Cow::Borrowed(&[]),
        field_map_slices: Cow::Borrowed(&[]),
        field_map_entries: Cow::Borrowed(&[]),
        external_scanner_states: Cow::Borrowed(&[]),
        external_symbol_map: Cow::Borrowed(&[]),
        external_scanner: None,
    };

    extern "C" fn truncated_language() -> *const () {
        std::ptr::addr_of!(TRUNCATED).cast()
    }

    #[test]
    fn static_tables_are_validated() {
        let language = Language::new(unsafe { LanguageFn::from_raw(truncated_language) });
        let mut parser = Parser::new();
        assert_eq!(
            parser.set_language(&language),
            Err(LanguageError::Malformed("parse table size"))
        );
        assert!(parser.language().is_none());
        assert!(parser.parse("x", None).is_none());
    }

    #[test]
    fn parse_without_language_returns_none() {
        let mut parser = Parser::new();
        assert!(parser.parse("x", None).is_none());
    }
}
