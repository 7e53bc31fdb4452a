//! Immutable, reference-counted syntax subtrees.
//!
//! Subtrees are the parser's representation of nodes: a leaf is one token, an
//! internal subtree owns its children. Subtrees never change after they are
//! built. Editing produces new subtrees along the affected path and shares
//! every untouched child with the original.

use std::fmt::{self, Write as _};
use std::io;
use std::sync::Arc;

use super::error_costs::{
    ERROR_COST_PER_MISSING_TREE, ERROR_COST_PER_RECOVERY, ERROR_COST_PER_SKIPPED_CHAR,
    ERROR_COST_PER_SKIPPED_LINE, ERROR_COST_PER_SKIPPED_TREE,
};
use super::language::{LanguageData, BUILTIN_SYM_ERROR, BUILTIN_SYM_ERROR_REPEAT};
use super::length::Length;
use crate::{StateId, Symbol};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Parse state of subtrees that must never be reused.
pub(crate) const TREE_STATE_NONE: StateId = u16::MAX;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The first token of a subtree, and the state it was lexed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FirstLeaf {
    pub symbol: Symbol,
    pub lex_state: StateId,
}

#[derive(Clone)]
pub(crate) struct Subtree(Arc<SubtreeData>);

#[derive(Clone, Debug)]
pub(crate) struct SubtreeData {
    pub symbol: Symbol,
    pub padding: Length,
    pub size: Length,
    /// Bytes past the end of this subtree that the lexer looked at while
    /// producing it.
    pub lookahead_bytes: usize,
    pub error_cost: u32,
    /// The state on the stack below this subtree when it was pushed.
    pub parse_state: StateId,
    /// The lex state in effect after this subtree's last token.
    pub end_state: StateId,
    pub first_leaf: FirstLeaf,

    pub visible: bool,
    pub named: bool,
    pub extra: bool,
    pub has_changes: bool,
    pub is_missing: bool,
    pub has_external_tokens: bool,
    pub depends_on_column: bool,

    pub kind: SubtreeKind,
}

#[derive(Clone, Debug)]
pub(crate) enum SubtreeKind {
    Leaf {
        /// Serialized scanner state after an external token.
        external_scanner_state: Option<Arc<[u8]>>,
        /// First character of an unrecognised token.
        lookahead_char: Option<char>,
    },
    Node(NodeData),
}

#[derive(Clone, Debug, Default)]
pub(crate) struct NodeData {
    pub children: Vec<Subtree>,
    pub production_id: u16,
    pub visible_child_count: u32,
    pub named_child_count: u32,
    pub visible_descendant_count: u32,
    pub dynamic_precedence: i32,
}

// Left-recursive repetitions nest deeply; release them iteratively.
impl Drop for NodeData {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(child) = pending.pop() {
            if let Ok(mut data) = Arc::try_unwrap(child.0) {
                if let SubtreeKind::Node(node) = &mut data.kind {
                    pending.append(&mut node.children);
                }
            }
        }
    }
}

/// The arguments of a leaf constructor.
pub(crate) struct LeafParams {
    pub symbol: Symbol,
    pub padding: Length,
    pub size: Length,
    pub lookahead_bytes: usize,
    pub lex_state: StateId,
    pub depends_on_column: bool,
    pub external_scanner_state: Option<Arc<[u8]>>,
}

/// An edit expressed in absolute lengths.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SubtreeEdit {
    pub start: Length,
    pub old_end: Length,
    pub new_end: Length,
}

// ===========================================================================
// Construction
// ===========================================================================

impl Subtree {
    fn from_data(data: SubtreeData) -> Self {
        Self(Arc::new(data))
    }

    pub(crate) fn new_leaf(params: LeafParams, language: &LanguageData) -> Self {
        let metadata = language.symbol_metadata(params.symbol);
        let has_external_tokens = params.external_scanner_state.is_some();
        Self::from_data(SubtreeData {
            symbol: params.symbol,
            padding: params.padding,
            size: params.size,
            lookahead_bytes: params.lookahead_bytes,
            error_cost: 0,
            parse_state: TREE_STATE_NONE,
            end_state: TREE_STATE_NONE,
            first_leaf: FirstLeaf {
                symbol: params.symbol,
                lex_state: params.lex_state,
            },
            visible: metadata.visible,
            named: metadata.named,
            extra: false,
            has_changes: false,
            is_missing: false,
            has_external_tokens,
            depends_on_column: params.depends_on_column,
            kind: SubtreeKind::Leaf {
                external_scanner_state: params.external_scanner_state,
                lookahead_char: None,
            },
        })
    }

    /// A token the lexer could not recognise.
    pub(crate) fn new_error_leaf(
        padding: Length,
        size: Length,
        lookahead_bytes: usize,
        lookahead_char: Option<char>,
        lex_state: StateId,
    ) -> Self {
        Self::from_data(SubtreeData {
            symbol: BUILTIN_SYM_ERROR,
            padding,
            size,
            lookahead_bytes,
            error_cost: ERROR_COST_PER_RECOVERY
                + ERROR_COST_PER_SKIPPED_CHAR * size.bytes as u32
                + ERROR_COST_PER_SKIPPED_LINE * size.extent.row as u32,
            parse_state: TREE_STATE_NONE,
            end_state: TREE_STATE_NONE,
            first_leaf: FirstLeaf {
                symbol: BUILTIN_SYM_ERROR,
                lex_state,
            },
            visible: true,
            named: true,
            extra: false,
            has_changes: false,
            is_missing: false,
            has_external_tokens: false,
            depends_on_column: false,
            kind: SubtreeKind::Leaf {
                external_scanner_state: None,
                lookahead_char,
            },
        })
    }

    /// A zero-width token inserted to repair the input.
    pub(crate) fn new_missing_leaf(
        symbol: Symbol,
        lookahead_bytes: usize,
        language: &LanguageData,
    ) -> Self {
        let mut data = Self::new_leaf(
            LeafParams {
                symbol,
                padding: Length::ZERO,
                size: Length::ZERO,
                lookahead_bytes,
                lex_state: TREE_STATE_NONE,
                depends_on_column: false,
                external_scanner_state: None,
            },
            language,
        )
        .into_data();
        data.is_missing = true;
        data.error_cost = ERROR_COST_PER_MISSING_TREE + ERROR_COST_PER_RECOVERY;
        Self::from_data(data)
    }

    /// An internal node. Its extent and counters are computed from `children`.
    pub(crate) fn new_node(
        symbol: Symbol,
        children: Vec<Subtree>,
        production_id: u16,
        language: &LanguageData,
    ) -> Self {
        let metadata = language.symbol_metadata(symbol);
        let mut data = SubtreeData {
            symbol,
            padding: Length::ZERO,
            size: Length::ZERO,
            lookahead_bytes: 0,
            error_cost: 0,
            parse_state: TREE_STATE_NONE,
            end_state: TREE_STATE_NONE,
            first_leaf: FirstLeaf {
                symbol: 0,
                lex_state: TREE_STATE_NONE,
            },
            visible: metadata.visible,
            named: metadata.named,
            extra: false,
            has_changes: false,
            is_missing: false,
            has_external_tokens: false,
            depends_on_column: false,
            kind: SubtreeKind::Node(NodeData {
                children,
                production_id,
                visible_child_count: 0,
                named_child_count: 0,
                visible_descendant_count: 0,
                dynamic_precedence: 0,
            }),
        };
        data.summarize_children();
        Self::from_data(data)
    }

    /// Wraps skipped or discarded material. Nested errors are flattened and
    /// unrecognised-token leaves are hidden, so a run of junk is one node.
    pub(crate) fn new_error_node(children: Vec<Subtree>, language: &LanguageData) -> Self {
        let mut flattened = Vec::with_capacity(children.len());
        for child in children {
            if child.is_error() {
                if child.child_count() > 0 {
                    flattened.extend(child.children().iter().cloned());
                } else {
                    flattened.push(child.with_visibility(false));
                }
            } else {
                flattened.push(child.with_extra(false));
            }
        }
        Self::new_node(BUILTIN_SYM_ERROR, flattened, 0, language)
    }

    fn into_data(self) -> SubtreeData {
        Arc::try_unwrap(self.0).unwrap_or_else(|shared| (*shared).clone())
    }

    fn modify(self, f: impl FnOnce(&mut SubtreeData)) -> Self {
        let mut data = self.into_data();
        f(&mut data);
        Self::from_data(data)
    }

    // -----------------------------------------------------------------------
    // Copy-on-write modifiers
    // -----------------------------------------------------------------------

    #[must_use]
    pub(crate) fn with_extra(self, extra: bool) -> Self {
        if self.0.extra == extra {
            return self;
        }
        self.modify(|data| data.extra = extra)
    }

    #[must_use]
    pub(crate) fn with_visibility(self, visible: bool) -> Self {
        if self.0.visible == visible {
            return self;
        }
        self.modify(|data| data.visible = visible)
    }

    /// Stamps the parse states a token is shifted with.
    #[must_use]
    pub(crate) fn with_states(self, parse_state: StateId, end_state: StateId) -> Self {
        if self.0.parse_state == parse_state && self.0.end_state == end_state {
            return self;
        }
        self.modify(|data| {
            data.parse_state = parse_state;
            data.end_state = end_state;
        })
    }

    #[must_use]
    pub(crate) fn with_parse_state(self, parse_state: StateId) -> Self {
        if self.0.parse_state == parse_state {
            return self;
        }
        self.modify(|data| data.parse_state = parse_state)
    }

    #[must_use]
    pub(crate) fn with_dynamic_precedence(self, precedence: i32) -> Self {
        if precedence == 0 {
            return self;
        }
        self.modify(|data| {
            if let SubtreeKind::Node(node) = &mut data.kind {
                node.dynamic_precedence += precedence;
            }
        })
    }

    /// Grows `lookahead_bytes` to cover bytes up to `examined_end`, measured
    /// from this subtree's padding start `start`.
    #[must_use]
    pub(crate) fn with_examined_end(self, start: usize, examined_end: usize) -> Self {
        let end = start + self.total_bytes();
        let lookahead = examined_end.saturating_sub(end);
        if lookahead <= self.0.lookahead_bytes {
            return self;
        }
        self.modify(|data| data.lookahead_bytes = lookahead)
    }

    /// Turns an accepted subtree into a document root spanning the whole
    /// input, leading padding included.
    #[must_use]
    pub(crate) fn into_root(self) -> Self {
        self.modify(|data| {
            data.size = data.padding + data.size;
            data.padding = Length::ZERO;
            data.parse_state = TREE_STATE_NONE;
            data.extra = false;
        })
    }
}

// ===========================================================================
// Accessors
// ===========================================================================

impl Subtree {
    #[inline]
    pub(crate) fn symbol(&self) -> Symbol {
        self.0.symbol
    }

    #[inline]
    pub(crate) fn padding(&self) -> Length {
        self.0.padding
    }

    #[inline]
    pub(crate) fn size(&self) -> Length {
        self.0.size
    }

    #[inline]
    pub(crate) fn total_size(&self) -> Length {
        self.0.padding + self.0.size
    }

    #[inline]
    pub(crate) fn total_bytes(&self) -> usize {
        self.0.padding.bytes + self.0.size.bytes
    }

    #[inline]
    pub(crate) fn lookahead_bytes(&self) -> usize {
        self.0.lookahead_bytes
    }

    #[inline]
    pub(crate) fn children(&self) -> &[Subtree] {
        match &self.0.kind {
            SubtreeKind::Node(node) => &node.children,
            SubtreeKind::Leaf { .. } => &[],
        }
    }

    #[inline]
    pub(crate) fn child_count(&self) -> usize {
        self.children().len()
    }

    #[inline]
    pub(crate) fn visible(&self) -> bool {
        self.0.visible
    }

    #[inline]
    pub(crate) fn named(&self) -> bool {
        self.0.named
    }

    #[inline]
    pub(crate) fn extra(&self) -> bool {
        self.0.extra
    }

    #[inline]
    pub(crate) fn is_missing(&self) -> bool {
        self.0.is_missing
    }

    #[inline]
    pub(crate) fn is_error(&self) -> bool {
        self.0.symbol == BUILTIN_SYM_ERROR
    }

    #[inline]
    pub(crate) fn has_changes(&self) -> bool {
        self.0.has_changes
    }

    #[inline]
    pub(crate) fn error_cost(&self) -> u32 {
        self.0.error_cost
    }

    #[inline]
    pub(crate) fn parse_state(&self) -> StateId {
        self.0.parse_state
    }

    #[inline]
    pub(crate) fn end_state(&self) -> StateId {
        self.0.end_state
    }

    #[inline]
    pub(crate) fn first_leaf(&self) -> FirstLeaf {
        self.0.first_leaf
    }

    #[inline]
    pub(crate) fn has_external_tokens(&self) -> bool {
        self.0.has_external_tokens
    }

    #[inline]
    pub(crate) fn depends_on_column(&self) -> bool {
        self.0.depends_on_column
    }

    pub(crate) fn production_id(&self) -> u16 {
        match &self.0.kind {
            SubtreeKind::Node(node) => node.production_id,
            SubtreeKind::Leaf { .. } => 0,
        }
    }

    pub(crate) fn visible_child_count(&self) -> u32 {
        match &self.0.kind {
            SubtreeKind::Node(node) => node.visible_child_count,
            SubtreeKind::Leaf { .. } => 0,
        }
    }

    pub(crate) fn named_child_count(&self) -> u32 {
        match &self.0.kind {
            SubtreeKind::Node(node) => node.named_child_count,
            SubtreeKind::Leaf { .. } => 0,
        }
    }

    pub(crate) fn visible_descendant_count(&self) -> u32 {
        match &self.0.kind {
            SubtreeKind::Node(node) => node.visible_descendant_count,
            SubtreeKind::Leaf { .. } => 0,
        }
    }

    pub(crate) fn dynamic_precedence(&self) -> i32 {
        match &self.0.kind {
            SubtreeKind::Node(node) => node.dynamic_precedence,
            SubtreeKind::Leaf { .. } => 0,
        }
    }

    pub(crate) fn external_scanner_state(&self) -> Option<&Arc<[u8]>> {
        match &self.0.kind {
            SubtreeKind::Leaf {
                external_scanner_state,
                ..
            } => external_scanner_state.as_ref(),
            SubtreeKind::Node(_) => None,
        }
    }

    pub(crate) fn lookahead_char(&self) -> Option<char> {
        match &self.0.kind {
            SubtreeKind::Leaf { lookahead_char, .. } => *lookahead_char,
            SubtreeKind::Node(_) => None,
        }
    }

    /// Whether the subtree contains errors, itself included.
    #[inline]
    pub(crate) fn has_error(&self) -> bool {
        self.0.error_cost > 0
    }

    /// A stable identity for the shared allocation.
    #[inline]
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[inline]
    pub(crate) fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub(crate) fn leftmost_leaf(&self) -> &Subtree {
        let mut tree = self;
        while let Some(first) = tree.children().first() {
            tree = first;
        }
        tree
    }

    /// The last external token inside this subtree.
    pub(crate) fn last_external_token(&self) -> Option<&Subtree> {
        if !self.has_external_tokens() {
            return None;
        }
        let mut tree = self;
        while tree.child_count() > 0 {
            tree = tree
                .children()
                .iter()
                .rev()
                .find(|child| child.has_external_tokens())?;
        }
        Some(tree)
    }

    /// Whether two external tokens leave the scanner in the same state.
    pub(crate) fn external_scanner_state_eq(a: Option<&Subtree>, b: Option<&Subtree>) -> bool {
        fn state(tree: Option<&Subtree>) -> &[u8] {
            tree.and_then(Subtree::external_scanner_state)
                .map_or(&[][..], |state| &state[..])
        }
        state(a) == state(b)
    }
}

// ===========================================================================
// Summaries
// ===========================================================================

impl SubtreeData {
    /// Recomputes everything a node derives from its children.
    fn summarize_children(&mut self) {
        let symbol = self.symbol;
        let SubtreeKind::Node(node) = &mut self.kind else {
            return;
        };

        let mut total = Length::ZERO;
        let mut lookahead_end = 0;
        let mut error_cost = 0;
        let mut has_external_tokens = false;
        let mut depends_on_column = false;
        node.visible_child_count = 0;
        node.named_child_count = 0;
        node.visible_descendant_count = 0;
        node.dynamic_precedence = 0;

        for child in &node.children {
            lookahead_end =
                lookahead_end.max(total.bytes + child.total_bytes() + child.lookahead_bytes());
            total += child.total_size();
            error_cost += child.error_cost();
            has_external_tokens |= child.has_external_tokens();
            depends_on_column |= child.depends_on_column();
            node.dynamic_precedence += child.dynamic_precedence();
            node.visible_descendant_count +=
                child.visible_descendant_count() + u32::from(child.visible());

            if child.visible() {
                node.visible_child_count += 1;
                if child.named() {
                    node.named_child_count += 1;
                }
            } else if child.child_count() > 0 {
                node.visible_child_count += child.visible_child_count();
                node.named_child_count += child.named_child_count();
            }
        }

        let padding = node.children.first().map_or(Length::ZERO, Subtree::padding);
        self.padding = padding;
        self.size = total - padding;
        self.lookahead_bytes = lookahead_end.saturating_sub(total.bytes);
        self.has_external_tokens = has_external_tokens;
        self.depends_on_column = depends_on_column;

        if symbol == BUILTIN_SYM_ERROR || symbol == BUILTIN_SYM_ERROR_REPEAT {
            error_cost += ERROR_COST_PER_RECOVERY
                + ERROR_COST_PER_SKIPPED_CHAR * self.size.bytes as u32
                + ERROR_COST_PER_SKIPPED_LINE * self.size.extent.row as u32;
            for child in &node.children {
                if child.extra() || (child.is_error() && child.child_count() == 0) {
                    continue;
                }
                if child.visible() {
                    error_cost += ERROR_COST_PER_SKIPPED_TREE;
                } else {
                    error_cost += ERROR_COST_PER_SKIPPED_TREE * child.visible_child_count();
                }
            }
        }
        self.error_cost = error_cost;

        if let Some(first) = node.children.first() {
            self.first_leaf = first.first_leaf();
        }
        self.end_state = node
            .children
            .iter()
            .rev()
            .map(Subtree::end_state)
            .find(|&state| state != TREE_STATE_NONE)
            .unwrap_or(TREE_STATE_NONE);
    }
}

// ===========================================================================
// Editing
// ===========================================================================

/// The new length of the region `[start, end)` after `edit`. The region keeps
/// the inserted text when `absorbs` is set.
fn edit_region(start: Length, end: Length, edit: &SubtreeEdit, absorbs: bool) -> Length {
    let before = if edit.start.bytes > start.bytes {
        edit.start.min(end) - start
    } else {
        Length::ZERO
    };
    let after = if edit.old_end.bytes < end.bytes {
        end - edit.old_end.max(start)
    } else {
        Length::ZERO
    };
    let inserted = if absorbs {
        edit.new_end - edit.start
    } else {
        Length::ZERO
    };
    before + inserted + after
}

impl Subtree {
    /// Applies an edit to a subtree whose padding starts at `start`. The
    /// result shares every child the edit does not reach.
    pub(crate) fn edit(&self, start: Length, edit: &SubtreeEdit, absorbs: bool) -> Subtree {
        let content_start = start + self.padding();
        let end = content_start + self.size();
        let mut data = self.0.as_ref().clone();
        data.has_changes = true;

        match &mut data.kind {
            SubtreeKind::Leaf { .. } => {
                let padding_absorbs = absorbs && edit.start.bytes < content_start.bytes;
                data.padding = edit_region(start, content_start, edit, padding_absorbs);
                data.size = edit_region(content_start, end, edit, absorbs && !padding_absorbs);
            }
            SubtreeKind::Node(node) => {
                let absorber = absorbs.then(|| {
                    let mut offset = start;
                    node.children
                        .iter()
                        .position(|child| {
                            offset += child.total_size();
                            offset.bytes >= edit.start.bytes
                        })
                        .unwrap_or(node.children.len().saturating_sub(1))
                });

                let mut child_start = start;
                for (index, child) in node.children.iter_mut().enumerate() {
                    let child_end = child_start + child.total_size();
                    let is_absorber = absorber == Some(index);
                    let reaches_edit = child_end.bytes + child.lookahead_bytes() >= edit.start.bytes
                        && child_start.bytes < edit.old_end.bytes;
                    let column_shift = child.depends_on_column()
                        && child_start.bytes >= edit.start.bytes
                        && child_start.extent.row == edit.old_end.extent.row;
                    if is_absorber || reaches_edit || column_shift {
                        *child = child.edit(child_start, edit, is_absorber);
                    }
                    child_start = child_end;
                }
                data.summarize_children();
                data.has_changes = true;
            }
        }
        Subtree::from_data(data)
    }
}

// ===========================================================================
// Comparison and printing
// ===========================================================================

impl PartialEq for Subtree {
    /// Structural equality: same symbols, extents and flags all the way down.
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            if Subtree::ptr_eq(a, b) {
                continue;
            }
            if a.symbol() != b.symbol()
                || a.padding() != b.padding()
                || a.size() != b.size()
                || a.extra() != b.extra()
                || a.visible() != b.visible()
                || a.is_missing() != b.is_missing()
                || a.production_id() != b.production_id()
                || a.child_count() != b.child_count()
            {
                return false;
            }
            pending.extend(a.children().iter().zip(b.children()));
        }
        true
    }
}

impl Eq for Subtree {}

impl fmt::Debug for Subtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtree")
            .field("symbol", &self.symbol())
            .field("padding", &self.padding().bytes)
            .field("size", &self.size().bytes)
            .field("child_count", &self.child_count())
            .finish()
    }
}

impl Subtree {
    /// Writes this subtree and its descendants, hidden nodes included, as a
    /// Graphviz digraph body.
    pub(crate) fn write_dot_graph(
        &self,
        language: &LanguageData,
        start: usize,
        out: &mut impl io::Write,
    ) -> io::Result<()> {
        let name = language.symbol_name(self.symbol()).unwrap_or("?");
        let mut label = String::new();
        for c in name.chars() {
            if c == '"' || c == '\\' {
                label.push('\\');
            }
            label.push(c);
        }
        let content_start = start + self.padding().bytes;
        let end = content_start + self.size().bytes;
        write!(out, "tree_{:x} [label=\"{label}\"", self.id())?;
        if self.child_count() == 0 {
            write!(out, ", shape=plaintext")?;
        }
        if self.extra() {
            write!(out, ", fontcolor=gray")?;
        }
        let mut tooltip = String::new();
        let _ = write!(
            tooltip,
            "range: {content_start} - {end}\nstate: {}\nerror-cost: {}\nhas-changes: {}\nlookahead-bytes: {}",
            self.parse_state(),
            self.error_cost(),
            self.has_changes(),
            self.lookahead_bytes(),
        );
        if self.is_missing() {
            tooltip.push_str("\nmissing: true");
        }
        if let Some(character) = self.lookahead_char() {
            let _ = write!(tooltip, "\ncharacter: {character:?}");
        }
        writeln!(out, ", tooltip=\"{}\"]", tooltip.replace('\n', "\\n"))?;

        let mut child_start = start;
        for child in self.children() {
            child.write_dot_graph(language, child_start, out)?;
            writeln!(out, "tree_{:x} -> tree_{:x}", self.id(), child.id())?;
            child_start += child.total_bytes();
        }
        Ok(())
    }
}
