//! Tree queries.
//!
//! A [`Query`] is a list of patterns written as S-expressions. Node kinds and
//! field names are resolved against a [`Language`] when the query is built,
//! so a query that compiles can only fail to match, never fail to run.
//! A [`QueryCursor`] runs a query over a node and yields either whole matches
//! or the individual captures of those matches in document order.
//!
//! ```text
//! (call_expression
//!   function: (identifier) @name
//!   arguments: (argument_list . (string) @first))
//! ((identifier) @keyword (#any-of? @keyword "print" "input"))
//! ```

use std::borrow::Cow;
use std::collections::VecDeque;
use std::convert::identity;
use std::fmt;
use std::ops::Range as ByteRange;

use regex::bytes::Regex;
use streaming_iterator::StreamingIterator;

use super::language::{Language, BUILTIN_SYM_ERROR};
use super::node::Node;
use crate::{FieldId, Point, Symbol};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    Syntax,
    NodeType,
    Field,
    Capture,
    Predicate,
    Structure,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Syntax => "syntax",
            Self::NodeType => "node type",
            Self::Field => "field",
            Self::Capture => "capture",
            Self::Predicate => "predicate",
            Self::Structure => "structure",
        })
    }
}

/// Why a query's source was rejected, and where. `row` and `column` are
/// zero-based; the message shows them one-based.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("query {kind} error at {}:{}: {message}", .row + 1, .column + 1)]
pub struct QueryError {
    pub row: usize,
    pub column: usize,
    pub offset: usize,
    pub message: String,
    pub kind: QueryErrorKind,
}

// ===========================================================================
// Predicates and properties
// ===========================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryPredicateArg {
    Capture(u32),
    String(Box<str>),
}

/// A predicate the cursor does not evaluate, left for the caller to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryPredicate {
    pub operator: Box<str>,
    pub args: Box<[QueryPredicateArg]>,
}

/// A key-value pair attached to a pattern with `#set!`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryProperty {
    pub key: Box<str>,
    pub value: Option<Box<str>>,
    pub capture_id: Option<usize>,
}

#[derive(Debug)]
enum Operand {
    String(Box<str>),
    Capture(u32),
}

/// A predicate over the text of captured nodes. `all` requires every node of
/// a quantified capture to pass; otherwise one passing node is enough.
#[derive(Debug)]
enum TextPredicate {
    Eq {
        capture: u32,
        operand: Operand,
        positive: bool,
        all: bool,
    },
    Match {
        capture: u32,
        regex: Regex,
        positive: bool,
        all: bool,
    },
    AnyOf {
        capture: u32,
        values: Vec<Box<str>>,
        positive: bool,
    },
}

/// Supplies the source text of a node to the text predicates.
///
/// Implemented for the whole source as a byte slice, and for closures that
/// return a node's text.
pub trait TextProvider {
    fn text(&mut self, node: Node<'_>) -> Cow<'_, [u8]>;
}

impl TextProvider for &[u8] {
    fn text(&mut self, node: Node<'_>) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.get(node.byte_range()).unwrap_or_default())
    }
}

impl<F, R> TextProvider for F
where
    F: FnMut(Node<'_>) -> R,
    R: AsRef<[u8]>,
{
    fn text(&mut self, node: Node<'_>) -> Cow<'_, [u8]> {
        Cow::Owned(self(node).as_ref().to_vec())
    }
}

impl TextPredicate {
    fn holds<T: TextProvider>(&self, captures: &[QueryCapture<'_>], text: &mut T) -> bool {
        let nodes = |index: u32| {
            captures
                .iter()
                .filter(move |capture| capture.index == index)
                .map(|capture| capture.node)
        };
        match self {
            Self::Eq {
                capture,
                operand: Operand::String(value),
                positive,
                all,
            } => {
                let mut results =
                    nodes(*capture).map(|node| (*text.text(node) == *value.as_bytes()) == *positive);
                if *all {
                    results.all(identity)
                } else {
                    results.any(identity)
                }
            }
            Self::Eq {
                capture,
                operand: Operand::Capture(other),
                positive,
                all,
            } => {
                let mut results = nodes(*capture).zip(nodes(*other)).map(|(left, right)| {
                    let left = text.text(left).into_owned();
                    (*left == *text.text(right)) == *positive
                });
                if *all {
                    results.all(identity)
                } else {
                    results.any(identity)
                }
            }
            Self::Match {
                capture,
                regex,
                positive,
                all,
            } => {
                let mut results =
                    nodes(*capture).map(|node| regex.is_match(&text.text(node)) == *positive);
                if *all {
                    results.all(identity)
                } else {
                    results.any(identity)
                }
            }
            Self::AnyOf {
                capture,
                values,
                positive,
            } => nodes(*capture).all(|node| {
                let node_text = text.text(node);
                values.iter().any(|value| *value.as_bytes() == *node_text) == *positive
            }),
        }
    }
}

// ===========================================================================
// Patterns
// ===========================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Quantifier {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug)]
enum Kind {
    /// `_`: any node.
    Any,
    /// `(_)`: any named node.
    AnyNamed,
    /// Every visible symbol sharing the pattern's name and namedness.
    Symbols(Vec<Symbol>),
}

impl Kind {
    fn matches(&self, node: &Node<'_>) -> bool {
        match self {
            Self::Any => true,
            Self::AnyNamed => node.is_named(),
            Self::Symbols(symbols) => symbols.contains(&node.kind_id()),
        }
    }
}

#[derive(Debug, Default)]
struct Sequence {
    elements: Vec<Element>,
    /// A trailing `.`: no named sibling may follow the last element.
    anchored_end: bool,
}

#[derive(Debug)]
enum Item {
    Node {
        kind: Kind,
        negated_fields: Vec<FieldId>,
        children: Sequence,
    },
    Alternation(Vec<Element>),
    Group(Sequence),
}

#[derive(Debug)]
struct Element {
    item: Item,
    field: Option<FieldId>,
    quantifier: Quantifier,
    captures: Vec<u32>,
    /// A preceding `.`: only anonymous siblings may sit between this element
    /// and the previous one (or the start of the parent).
    anchored: bool,
}

#[derive(Debug)]
struct Pattern {
    root: Sequence,
    start_byte: usize,
    text_predicates: Vec<TextPredicate>,
    properties: Vec<QueryProperty>,
    general_predicates: Vec<QueryPredicate>,
    enabled: bool,
}

impl Pattern {
    fn satisfied_by<T: TextProvider>(&self, captures: &[QueryCapture<'_>], text: &mut T) -> bool {
        self.text_predicates
            .iter()
            .all(|predicate| predicate.holds(captures, text))
    }
}

/// A compiled set of patterns for one language.
#[derive(Debug)]
pub struct Query {
    language: Language,
    patterns: Vec<Pattern>,
    capture_names: Vec<String>,
    disabled_captures: Vec<bool>,
}

impl Query {
    /// Compiles `source` against `language`.
    ///
    /// Node kinds, field names and predicate arguments are all checked here;
    /// the error points at the first offending token.
    pub fn new(language: &Language, source: &str) -> Result<Self, QueryError> {
        let (patterns, capture_names) = QueryParser::new(language, source).parse()?;
        tracing::debug!(
            target: "canopy::query",
            language = %language.name(),
            patterns = patterns.len(),
            captures = capture_names.len(),
            "query"
        );
        Ok(Self {
            language: language.clone(),
            disabled_captures: vec![false; capture_names.len()],
            patterns,
            capture_names,
        })
    }

    #[must_use]
    pub fn language(&self) -> &Language {
        &self.language
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// The names of all captures, indexed by capture id.
    #[must_use]
    pub fn capture_names(&self) -> &[String] {
        &self.capture_names
    }

    #[must_use]
    pub fn capture_index_for_name(&self, name: &str) -> Option<u32> {
        self.capture_names
            .iter()
            .position(|capture| capture == name)
            .map(|index| index as u32)
    }

    /// The byte offset where the pattern begins in the query source.
    #[must_use]
    pub fn start_byte_for_pattern(&self, pattern_index: usize) -> usize {
        self.patterns[pattern_index].start_byte
    }

    /// The `#set!` properties of a pattern.
    #[must_use]
    pub fn property_settings(&self, pattern_index: usize) -> &[QueryProperty] {
        &self.patterns[pattern_index].properties
    }

    /// The predicates of a pattern that the cursor does not evaluate.
    #[must_use]
    pub fn general_predicates(&self, pattern_index: usize) -> &[QueryPredicate] {
        &self.patterns[pattern_index].general_predicates
    }

    /// Stops reporting a capture. Predicates on it are still evaluated.
    pub fn disable_capture(&mut self, name: &str) {
        if let Some(index) = self.capture_index_for_name(name) {
            self.disabled_captures[index as usize] = true;
        }
    }

    /// Stops matching a pattern. Pattern indices are unaffected.
    pub fn disable_pattern(&mut self, pattern_index: usize) {
        if let Some(pattern) = self.patterns.get_mut(pattern_index) {
            pattern.enabled = false;
        }
    }
}

// ===========================================================================
// Query source parser
// ===========================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    Node,
    Group,
    Alternation,
}

enum RawArg {
    Capture(String, usize),
    String(String),
}

struct RawPredicate {
    offset: usize,
    operator: String,
    args: Vec<RawArg>,
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '?' | '!')
}

struct QueryParser<'a> {
    language: &'a Language,
    source: &'a str,
    offset: usize,
    capture_names: Vec<String>,
    pattern_captures: Vec<u32>,
    predicates: Vec<RawPredicate>,
}

impl<'a> QueryParser<'a> {
    fn new(language: &'a Language, source: &'a str) -> Self {
        Self {
            language,
            source,
            offset: 0,
            capture_names: Vec::new(),
            pattern_captures: Vec::new(),
            predicates: Vec::new(),
        }
    }

    fn error(&self, kind: QueryErrorKind, offset: usize, message: impl Into<String>) -> QueryError {
        let before = &self.source[..offset];
        QueryError {
            row: before.matches('\n').count(),
            column: before.rfind('\n').map_or(offset, |newline| offset - newline - 1),
            offset,
            message: message.into(),
            kind,
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.offset += c.len_utf8();
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.offset += rest.len() - trimmed.len();
            if !trimmed.starts_with(';') {
                return;
            }
            self.offset += trimmed.find('\n').unwrap_or(trimmed.len());
        }
    }

    fn identifier(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !is_identifier_char(c))
            .unwrap_or(rest.len());
        self.offset += len;
        &rest[..len]
    }

    fn unexpected(&self) -> QueryError {
        let message = match self.peek() {
            Some(c) => format!("unexpected {c:?}"),
            None => "unexpected end of query".to_owned(),
        };
        self.error(QueryErrorKind::Syntax, self.offset, message)
    }

    fn string(&mut self) -> Result<String, QueryError> {
        let start = self.offset;
        self.bump();
        let mut value = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((index, c)) = chars.next() {
            match c {
                '"' => {
                    self.offset += index + 1;
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, '0')) => value.push('\0'),
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                c => value.push(c),
            }
        }
        Err(self.error(QueryErrorKind::Syntax, start, "unterminated string"))
    }

    fn capture_id(&mut self, name: &str) -> u32 {
        let index = self
            .capture_names
            .iter()
            .position(|capture| capture == name)
            .unwrap_or_else(|| {
                self.capture_names.push(name.to_owned());
                self.capture_names.len() - 1
            });
        index as u32
    }

    fn resolve_kind(&self, name: &str, named: bool, offset: usize) -> Result<Kind, QueryError> {
        if named && name == "ERROR" {
            return Ok(Kind::Symbols(vec![BUILTIN_SYM_ERROR]));
        }
        let language = self.language;
        let symbols: Vec<Symbol> = (1..language.node_kind_count() as Symbol)
            .filter(|&id| {
                language.node_kind_is_visible(id)
                    && language.node_kind_is_named(id) == named
                    && language.node_kind_for_id(id) == Some(name)
            })
            .collect();
        if symbols.is_empty() {
            return Err(self.error(QueryErrorKind::NodeType, offset, name));
        }
        Ok(Kind::Symbols(symbols))
    }

    fn resolve_field(&self, name: &str, offset: usize) -> Result<FieldId, QueryError> {
        self.language
            .field_id_for_name(name)
            .ok_or_else(|| self.error(QueryErrorKind::Field, offset, name))
    }

    fn at_predicate(&self) -> bool {
        self.rest()
            .strip_prefix('(')
            .is_some_and(|rest| rest.trim_start().starts_with('#'))
    }

    fn parse(mut self) -> Result<(Vec<Pattern>, Vec<String>), QueryError> {
        let mut patterns = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek().is_none() {
                break;
            }
            let start_byte = self.offset;
            self.pattern_captures.clear();
            self.predicates.clear();

            let mut element = self.element()?;
            if element.field.is_some() {
                return Err(self.error(
                    QueryErrorKind::Structure,
                    start_byte,
                    "a top-level pattern cannot have a field",
                ));
            }
            // Top-level repetitions cover runs of siblings, never nothing.
            element.quantifier = match element.quantifier {
                Quantifier::ZeroOrOne => Quantifier::One,
                Quantifier::ZeroOrMore => Quantifier::OneOrMore,
                other => other,
            };

            let mut pattern = Pattern {
                root: Sequence {
                    elements: vec![element],
                    anchored_end: false,
                },
                start_byte,
                text_predicates: Vec::new(),
                properties: Vec::new(),
                general_predicates: Vec::new(),
                enabled: true,
            };
            for predicate in std::mem::take(&mut self.predicates) {
                self.add_predicate(&mut pattern, predicate)?;
            }
            patterns.push(pattern);
        }
        Ok((patterns, self.capture_names))
    }

    /// Parses one pattern element with its field prefix, quantifier and
    /// captures.
    fn element(&mut self) -> Result<Element, QueryError> {
        let start = self.offset;
        let mut field = None;
        let item = match self.peek() {
            Some('(') => {
                self.bump();
                self.skip_trivia();
                self.parenthesized(start)?
            }
            Some('[') => {
                self.bump();
                let alternatives = self.sequence(']', Context::Alternation)?.0;
                if alternatives.elements.is_empty() {
                    return Err(self.error(QueryErrorKind::Syntax, start, "empty alternation"));
                }
                Item::Alternation(alternatives.elements)
            }
            Some('"') => {
                let value = self.string()?;
                Item::Node {
                    kind: self.resolve_kind(&value, false, start)?,
                    negated_fields: Vec::new(),
                    children: Sequence::default(),
                }
            }
            Some(c) if is_identifier_char(c) => {
                let name = self.identifier();
                if self.peek() == Some(':') {
                    self.bump();
                    field = Some(self.resolve_field(name, start)?);
                    self.skip_trivia();
                    let mut inner = self.element()?;
                    if inner.field.is_some() {
                        return Err(self.error(
                            QueryErrorKind::Syntax,
                            start,
                            "a pattern can only have one field",
                        ));
                    }
                    inner.field = field;
                    return Ok(inner);
                }
                if name != "_" {
                    return Err(self.error(QueryErrorKind::Syntax, start, format!("unexpected {name:?}")));
                }
                Item::Node {
                    kind: Kind::Any,
                    negated_fields: Vec::new(),
                    children: Sequence::default(),
                }
            }
            _ => return Err(self.unexpected()),
        };

        let mut quantifier = Quantifier::One;
        let mut captures = Vec::new();
        loop {
            self.skip_trivia();
            let next = match self.peek() {
                Some('?') => Quantifier::ZeroOrOne,
                Some('*') => Quantifier::ZeroOrMore,
                Some('+') => Quantifier::OneOrMore,
                Some('@') => {
                    self.bump();
                    let name = self.identifier();
                    if name.is_empty() {
                        return Err(self.unexpected());
                    }
                    let id = self.capture_id(name);
                    captures.push(id);
                    self.pattern_captures.push(id);
                    continue;
                }
                _ => break,
            };
            if quantifier != Quantifier::One || !captures.is_empty() {
                return Err(self.unexpected());
            }
            quantifier = next;
            self.bump();
        }

        Ok(Element {
            item,
            field,
            quantifier,
            captures,
            anchored: false,
        })
    }

    /// Parses what follows an opening parenthesis: a group of sibling
    /// patterns, or a node pattern with its children.
    fn parenthesized(&mut self, start: usize) -> Result<Item, QueryError> {
        if matches!(self.peek(), Some('(' | '[' | '"' | '.')) {
            let (group, _) = self.sequence(')', Context::Group)?;
            if group.elements.is_empty() {
                return Err(self.error(QueryErrorKind::Syntax, start, "empty group"));
            }
            return Ok(Item::Group(group));
        }

        let name_offset = self.offset;
        let name = self.identifier();
        if name.is_empty() {
            return Err(self.unexpected());
        }
        let kind = if name == "_" {
            Kind::AnyNamed
        } else {
            self.resolve_kind(name, true, name_offset)?
        };
        let (children, negated_fields) = self.sequence(')', Context::Node)?;

        if let Kind::Symbols(symbols) = &kind {
            let token_count = self.language.token_count;
            let leaf_only = symbols
                .iter()
                .all(|&symbol| symbol != BUILTIN_SYM_ERROR && u32::from(symbol) < token_count);
            if leaf_only && !children.elements.is_empty() {
                return Err(self.error(
                    QueryErrorKind::Structure,
                    start,
                    format!("{name} has no children"),
                ));
            }
        }
        Ok(Item::Node {
            kind,
            negated_fields,
            children,
        })
    }

    /// Parses elements up to `close`, along with anchors, negated fields and
    /// predicates.
    fn sequence(
        &mut self,
        close: char,
        context: Context,
    ) -> Result<(Sequence, Vec<FieldId>), QueryError> {
        let mut sequence = Sequence::default();
        let mut negated_fields = Vec::new();
        let mut anchored = false;
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.unexpected()),
                Some(c) if c == close => {
                    self.bump();
                    break;
                }
                Some('.') if context != Context::Alternation => {
                    self.bump();
                    anchored = true;
                }
                Some('!') if context == Context::Node => {
                    self.bump();
                    let offset = self.offset;
                    let name = self.identifier();
                    negated_fields.push(self.resolve_field(name, offset)?);
                }
                Some('(') if self.at_predicate() => self.predicate()?,
                Some(_) => {
                    let mut element = self.element()?;
                    element.anchored = anchored;
                    anchored = false;
                    sequence.elements.push(element);
                }
            }
        }
        sequence.anchored_end = anchored;
        Ok((sequence, negated_fields))
    }

    fn predicate(&mut self) -> Result<(), QueryError> {
        let offset = self.offset;
        self.bump();
        self.skip_trivia();
        self.bump();
        let operator = self.identifier();
        if operator.is_empty() {
            return Err(self.unexpected());
        }
        let mut args = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(')') => {
                    self.bump();
                    break;
                }
                Some('@') => {
                    self.bump();
                    let offset = self.offset;
                    let name = self.identifier();
                    args.push(RawArg::Capture(name.to_owned(), offset));
                }
                Some('"') => args.push(RawArg::String(self.string()?)),
                Some(c) if is_identifier_char(c) => {
                    args.push(RawArg::String(self.identifier().to_owned()));
                }
                _ => return Err(self.unexpected()),
            }
        }
        self.predicates.push(RawPredicate {
            offset,
            operator: operator.to_owned(),
            args,
        });
        Ok(())
    }

    fn add_predicate(&self, pattern: &mut Pattern, predicate: RawPredicate) -> Result<(), QueryError> {
        let RawPredicate {
            offset,
            operator,
            args,
        } = predicate;
        let invalid = |message: String| self.error(QueryErrorKind::Predicate, offset, message);

        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            resolved.push(match arg {
                RawArg::Capture(name, at) => {
                    let id = self
                        .capture_names
                        .iter()
                        .position(|capture| *capture == name)
                        .map(|index| index as u32)
                        .filter(|id| self.pattern_captures.contains(id))
                        .ok_or_else(|| self.error(QueryErrorKind::Capture, at, name))?;
                    QueryPredicateArg::Capture(id)
                }
                RawArg::String(value) => QueryPredicateArg::String(value.into()),
            });
        }

        let positive = !operator.contains("not-");
        match operator.as_str() {
            "eq?" | "not-eq?" | "any-eq?" | "any-not-eq?" => {
                let [QueryPredicateArg::Capture(capture), other] = resolved.as_slice() else {
                    return Err(invalid(format!(
                        "#{operator} takes a capture and a capture or string"
                    )));
                };
                let operand = match other {
                    QueryPredicateArg::Capture(other) => Operand::Capture(*other),
                    QueryPredicateArg::String(value) => Operand::String(value.clone()),
                };
                pattern.text_predicates.push(TextPredicate::Eq {
                    capture: *capture,
                    operand,
                    positive,
                    all: !operator.starts_with("any-"),
                });
            }
            "match?" | "not-match?" | "any-match?" | "any-not-match?" => {
                let [QueryPredicateArg::Capture(capture), QueryPredicateArg::String(source)] =
                    resolved.as_slice()
                else {
                    return Err(invalid(format!("#{operator} takes a capture and a string")));
                };
                let regex = Regex::new(source).map_err(|error| invalid(error.to_string()))?;
                pattern.text_predicates.push(TextPredicate::Match {
                    capture: *capture,
                    regex,
                    positive,
                    all: !operator.starts_with("any-"),
                });
            }
            "any-of?" | "not-any-of?" => {
                let Some((QueryPredicateArg::Capture(capture), rest)) = resolved.split_first()
                else {
                    return Err(invalid(format!("#{operator} takes a capture first")));
                };
                let values = rest
                    .iter()
                    .map(|arg| match arg {
                        QueryPredicateArg::String(value) => Ok(value.clone()),
                        QueryPredicateArg::Capture(_) => {
                            Err(invalid(format!("#{operator} takes only strings after the capture")))
                        }
                    })
                    .collect::<Result<_, _>>()?;
                pattern.text_predicates.push(TextPredicate::AnyOf {
                    capture: *capture,
                    values,
                    positive,
                });
            }
            "set!" => {
                let (capture_id, rest) = match resolved.split_first() {
                    Some((QueryPredicateArg::Capture(id), rest)) => (Some(*id as usize), rest),
                    _ => (None, resolved.as_slice()),
                };
                let property = match rest {
                    [QueryPredicateArg::String(key)] => QueryProperty {
                        key: key.clone(),
                        value: None,
                        capture_id,
                    },
                    [QueryPredicateArg::String(key), QueryPredicateArg::String(value)] => {
                        QueryProperty {
                            key: key.clone(),
                            value: Some(value.clone()),
                            capture_id,
                        }
                    }
                    _ => return Err(invalid("#set! takes a key and an optional value".to_owned())),
                };
                pattern.properties.push(property);
            }
            _ => pattern.general_predicates.push(QueryPredicate {
                operator: operator.as_str().into(),
                args: resolved.into(),
            }),
        }
        Ok(())
    }
}

// ===========================================================================
// Matching
// ===========================================================================

/// A node captured by a match, with the id of the capture name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryCapture<'tree> {
    pub node: Node<'tree>,
    pub index: u32,
}

/// One way a pattern matched, with its captures in pattern order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryMatch<'tree> {
    pub pattern_index: usize,
    pub captures: Vec<QueryCapture<'tree>>,
    id: u32,
}

impl<'tree> QueryMatch<'tree> {
    /// A number identifying the match among those yielded by one cursor run.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn nodes_for_capture_index(&self, index: u32) -> impl Iterator<Item = Node<'tree>> + '_ {
        self.captures
            .iter()
            .filter(move |capture| capture.index == index)
            .map(|capture| capture.node)
    }
}

type Captures<'tree> = Vec<QueryCapture<'tree>>;

/// A visible child and the field it is stored under.
#[derive(Clone, Copy)]
struct Entry<'tree> {
    node: Node<'tree>,
    field: Option<FieldId>,
}

fn child_entries(node: Node<'_>) -> Vec<Entry<'_>> {
    let mut entries = Vec::new();
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            entries.push(Entry {
                node: cursor.node(),
                field: cursor.field_id(),
            });
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    entries
}

fn only_anonymous_after(entries: &[Entry<'_>], position: usize) -> bool {
    entries[position..].iter().all(|entry| !entry.node.is_named())
}

/// Sibling indices where an element may start. Unanchored elements skip any
/// siblings; anchored ones skip only anonymous nodes.
fn candidates(entries: &[Entry<'_>], position: usize, fixed: bool, anchored: bool) -> ByteRange<usize> {
    if fixed {
        return position..(position + 1).min(entries.len()).max(position);
    }
    if anchored {
        let end = entries[position..]
            .iter()
            .position(|entry| entry.node.is_named())
            .map_or(entries.len(), |offset| position + offset + 1);
        return position..end;
    }
    position..entries.len()
}

/// Backtracking matcher over sibling lists. Repetitions are possessive: they
/// take every matching sibling and are not shortened to let later elements
/// match.
struct Matcher {
    limit: usize,
    exceeded: bool,
}

impl Matcher {
    fn sequence<'tree>(
        &mut self,
        elements: &[Element],
        entries: &[Entry<'tree>],
        position: usize,
        fixed: bool,
        bound: &mut Captures<'tree>,
        out: &mut Vec<(usize, Captures<'tree>)>,
    ) {
        let Some((element, rest)) = elements.split_first() else {
            if out.len() >= self.limit {
                self.exceeded = true;
            } else {
                out.push((position, bound.clone()));
            }
            return;
        };

        let mark = bound.len();
        if element.quantifier == Quantifier::One {
            for index in candidates(entries, position, fixed, element.anchored) {
                for (end, captures) in self.element_at(element, entries, index) {
                    bound.extend(captures);
                    self.sequence(rest, entries, end, false, bound, out);
                    bound.truncate(mark);
                }
            }
            return;
        }

        let mut end = position;
        let mut count = 0;
        while !(element.quantifier == Quantifier::ZeroOrOne && count == 1) {
            let first_fixed = fixed && count == 0;
            let found = candidates(entries, end, first_fixed, element.anchored)
                .find_map(|index| self.element_at(element, entries, index).into_iter().next());
            let Some((next, captures)) = found else {
                break;
            };
            bound.extend(captures);
            count += 1;
            if next <= end {
                break;
            }
            end = next;
        }
        if count > 0 || element.quantifier != Quantifier::OneOrMore {
            self.sequence(rest, entries, end, fixed && count == 0, bound, out);
        }
        bound.truncate(mark);
    }

    /// Every way `element` matches starting exactly at `entries[index]`, as
    /// the index after the match and the captures made.
    fn element_at<'tree>(
        &mut self,
        element: &Element,
        entries: &[Entry<'tree>],
        index: usize,
    ) -> Vec<(usize, Captures<'tree>)> {
        let entry = entries[index];
        if element.field.is_some_and(|field| entry.field != Some(field)) {
            return Vec::new();
        }
        let own = |node: Node<'tree>| -> Captures<'tree> {
            element
                .captures
                .iter()
                .map(|&capture| QueryCapture {
                    node,
                    index: capture,
                })
                .collect()
        };

        let found = match &element.item {
            Item::Node {
                kind,
                negated_fields,
                children,
            } => {
                let node = entry.node;
                if !kind.matches(&node)
                    || negated_fields
                        .iter()
                        .any(|&field| node.child_by_field_id(field).is_some())
                {
                    return Vec::new();
                }
                if children.elements.is_empty() {
                    return vec![(index + 1, own(node))];
                }
                let child_entries = child_entries(node);
                let mut found = Vec::new();
                self.sequence(
                    &children.elements,
                    &child_entries,
                    0,
                    false,
                    &mut Vec::new(),
                    &mut found,
                );
                found.retain(|(end, _)| {
                    !children.anchored_end || only_anonymous_after(&child_entries, *end)
                });
                found
                    .into_iter()
                    .map(|(_, captures)| (index + 1, captures))
                    .collect()
            }
            Item::Alternation(alternatives) => {
                let mut found = Vec::new();
                for alternative in alternatives {
                    found.extend(self.element_at(alternative, entries, index));
                }
                found
            }
            Item::Group(sequence) => {
                let mut found = Vec::new();
                self.sequence(
                    &sequence.elements,
                    entries,
                    index,
                    true,
                    &mut Vec::new(),
                    &mut found,
                );
                found
            }
        };

        found
            .into_iter()
            .map(|(end, captures)| {
                let mut all = own(entry.node);
                all.extend(captures);
                (end, all)
            })
            .collect()
    }
}

// ===========================================================================
// Cursor
// ===========================================================================

/// Runs queries and holds the restrictions that apply to a run.
#[derive(Clone, Debug)]
pub struct QueryCursor {
    byte_range: ByteRange<usize>,
    point_range: ByteRange<Point>,
    match_limit: u32,
    exceeded_match_limit: bool,
}

impl Default for QueryCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCursor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            byte_range: 0..usize::MAX,
            point_range: Point::default()..Point::new(usize::MAX, usize::MAX),
            match_limit: u32::MAX,
            exceeded_match_limit: false,
        }
    }

    /// Only yields matches whose outermost node intersects `range`. Nodes
    /// outside of it are not descended into.
    pub fn set_byte_range(&mut self, range: ByteRange<usize>) -> &mut Self {
        self.byte_range = range;
        self
    }

    /// Like [`QueryCursor::set_byte_range`], in rows and columns.
    pub fn set_point_range(&mut self, range: ByteRange<Point>) -> &mut Self {
        self.point_range = range;
        self
    }

    #[must_use]
    pub fn byte_range(&self) -> ByteRange<usize> {
        self.byte_range.clone()
    }

    #[must_use]
    pub fn point_range(&self) -> ByteRange<Point> {
        self.point_range.clone()
    }

    #[must_use]
    pub fn match_limit(&self) -> u32 {
        self.match_limit
    }

    /// Caps how many alternative matches are kept for one pattern at one
    /// node. Extra alternatives are dropped.
    pub fn set_match_limit(&mut self, limit: u32) {
        self.match_limit = limit;
    }

    /// Whether the last run dropped matches because of the match limit.
    #[must_use]
    pub fn did_exceed_match_limit(&self) -> bool {
        self.exceeded_match_limit
    }

    fn start<'query, 'tree, T: TextProvider>(
        &mut self,
        query: &'query Query,
        node: Node<'tree>,
        text_provider: T,
    ) -> Run<'query, 'tree, T> {
        self.exceeded_match_limit = false;
        Run {
            query,
            text_provider,
            frames: vec![Frame {
                entries: vec![Entry { node, field: None }],
                next: 0,
            }],
            pending: VecDeque::new(),
            byte_range: self.byte_range.clone(),
            point_range: self.point_range.clone(),
            matcher: Matcher {
                limit: self.match_limit as usize,
                exceeded: false,
            },
            next_id: 0,
        }
    }

    /// Iterates over every match of `query` in the subtree of `node`, in
    /// pre-order of the node each match starts at, then by pattern index.
    pub fn matches<'query, 'tree, T: TextProvider>(
        &mut self,
        query: &'query Query,
        node: Node<'tree>,
        text_provider: T,
    ) -> QueryMatches<'_, 'query, 'tree, T> {
        let run = self.start(query, node, text_provider);
        QueryMatches {
            run,
            current: None,
            exceeded: &mut self.exceeded_match_limit,
        }
    }

    /// Iterates over the captures of every match, ordered by the start of
    /// the captured node, then by pattern index. Each item is a match and the
    /// index of the capture within it.
    pub fn captures<'query, 'tree, T: TextProvider>(
        &mut self,
        query: &'query Query,
        node: Node<'tree>,
        text_provider: T,
    ) -> QueryCaptures<'_, 'query, 'tree, T> {
        let run = self.start(query, node, text_provider);
        QueryCaptures {
            run,
            buffer: VecDeque::new(),
            current: None,
            exceeded: &mut self.exceeded_match_limit,
        }
    }
}

fn intersects<T: PartialOrd>(start: T, end: T, range: &ByteRange<T>) -> bool {
    start < range.end && (end > range.start || (start == end && start >= range.start))
}

struct Frame<'tree> {
    entries: Vec<Entry<'tree>>,
    next: usize,
}

/// The state of one pre-order traversal.
struct Run<'query, 'tree, T> {
    query: &'query Query,
    text_provider: T,
    frames: Vec<Frame<'tree>>,
    pending: VecDeque<QueryMatch<'tree>>,
    byte_range: ByteRange<usize>,
    point_range: ByteRange<Point>,
    matcher: Matcher,
    next_id: u32,
}

impl<'tree, T: TextProvider> Run<'_, 'tree, T> {
    fn in_range(&self, node: &Node<'_>) -> bool {
        intersects(node.start_byte(), node.end_byte(), &self.byte_range)
            && intersects(node.start_position(), node.end_position(), &self.point_range)
    }

    /// The start byte of the next node the traversal will visit. Every match
    /// found from now on starts at or after it.
    fn frontier(&self) -> Option<usize> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.entries.get(frame.next))
            .map(|entry| entry.node.start_byte())
    }

    /// Visits the next node in range, queueing its matches. Returns `None`
    /// once the traversal is done.
    fn visit_next(&mut self) -> Option<()> {
        loop {
            let frame = self.frames.last_mut()?;
            let Some(&entry) = frame.entries.get(frame.next) else {
                self.frames.pop();
                continue;
            };
            let index = frame.next;
            frame.next += 1;
            if !self.in_range(&entry.node) {
                continue;
            }
            self.collect_matches(index);
            let children = child_entries(entry.node);
            if !children.is_empty() {
                self.frames.push(Frame {
                    entries: children,
                    next: 0,
                });
            }
            return Some(());
        }
    }

    fn collect_matches(&mut self, index: usize) {
        let Self {
            query,
            text_provider,
            frames,
            pending,
            matcher,
            next_id,
            ..
        } = self;
        let Some(frame) = frames.last() else {
            return;
        };
        for (pattern_index, pattern) in query.patterns.iter().enumerate() {
            if !pattern.enabled {
                continue;
            }
            let mut found = Vec::new();
            matcher.sequence(
                &pattern.root.elements,
                &frame.entries,
                index,
                true,
                &mut Vec::new(),
                &mut found,
            );
            let mut seen: Vec<Captures<'tree>> = Vec::new();
            for (_, captures) in found {
                if seen.contains(&captures) {
                    continue;
                }
                let satisfied = pattern.satisfied_by(&captures, text_provider);
                seen.push(captures.clone());
                if !satisfied {
                    continue;
                }
                tracing::trace!(
                    target: "canopy::query",
                    pattern = pattern_index,
                    node = frame.entries[index].node.kind(),
                    "match"
                );
                pending.push_back(QueryMatch {
                    pattern_index,
                    captures: captures
                        .into_iter()
                        .filter(|capture| !query.disabled_captures[capture.index as usize])
                        .collect(),
                    id: *next_id,
                });
                *next_id += 1;
            }
        }
    }

    fn next_match(&mut self) -> Option<QueryMatch<'tree>> {
        loop {
            if let Some(found) = self.pending.pop_front() {
                return Some(found);
            }
            self.visit_next()?;
        }
    }
}

/// The matches of a query, returned by [`QueryCursor::matches`].
pub struct QueryMatches<'cursor, 'query, 'tree, T> {
    run: Run<'query, 'tree, T>,
    current: Option<QueryMatch<'tree>>,
    exceeded: &'cursor mut bool,
}

impl<'tree, T: TextProvider> StreamingIterator for QueryMatches<'_, '_, 'tree, T> {
    type Item = QueryMatch<'tree>;

    fn advance(&mut self) {
        self.current = self.run.next_match();
        *self.exceeded |= self.run.matcher.exceeded;
    }

    fn get(&self) -> Option<&QueryMatch<'tree>> {
        self.current.as_ref()
    }
}

/// The captures of a query in document order, returned by
/// [`QueryCursor::captures`].
pub struct QueryCaptures<'cursor, 'query, 'tree, T> {
    run: Run<'query, 'tree, T>,
    buffer: VecDeque<(QueryMatch<'tree>, usize)>,
    current: Option<(QueryMatch<'tree>, usize)>,
    exceeded: &'cursor mut bool,
}

impl<'tree, T: TextProvider> QueryCaptures<'_, '_, 'tree, T> {
    fn buffer_match(&mut self, found: QueryMatch<'tree>) {
        let key = |(found, index): &(QueryMatch<'_>, usize)| {
            (found.captures[*index].node.start_byte(), found.pattern_index)
        };
        for index in 0..found.captures.len() {
            let item = (found.clone(), index);
            let at = self
                .buffer
                .partition_point(|queued| key(queued) <= key(&item));
            self.buffer.insert(at, item);
        }
    }
}

impl<'tree, T: TextProvider> StreamingIterator for QueryCaptures<'_, '_, 'tree, T> {
    type Item = (QueryMatch<'tree>, usize);

    fn advance(&mut self) {
        self.current = loop {
            if let Some(found) = self.run.pending.pop_front() {
                self.buffer_match(found);
                continue;
            }
            let frontier = self.run.frontier();
            let ready = self.buffer.front().is_some_and(|(found, index)| {
                frontier.map_or(true, |frontier| found.captures[*index].node.start_byte() < frontier)
            });
            if ready || self.run.visit_next().is_none() {
                break self.buffer.pop_front();
            }
        };
        *self.exceeded |= self.run.matcher.exceeded;
    }

    fn get(&self) -> Option<&(QueryMatch<'tree>, usize)> {
        self.current.as_ref()
    }
}
