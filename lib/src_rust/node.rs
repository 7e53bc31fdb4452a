//! Read-only node handles.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range as ByteRange;
use std::str::Utf8Error;

use super::language::{Language, BUILTIN_SYM_ERROR};
use super::length::Length;
use super::subtree::Subtree;
use super::tree::Tree;
use super::tree_cursor::TreeCursor;
use crate::{FieldId, Point, Range, Symbol};

/// A single node within a syntax tree.
///
/// Nodes are small `Copy` handles borrowing from their [`Tree`]. Hidden nodes
/// (helper rules and repetitions) never appear; their children are reported
/// as children of the nearest visible ancestor.
#[derive(Clone, Copy)]
pub struct Node<'tree> {
    tree: &'tree Tree,
    subtree: &'tree Subtree,
    /// Absolute position of the node's padding start.
    position: Length,
}

/// One raw child, hidden or not, with its position among its parent's
/// non-extra children.
#[derive(Clone, Copy)]
struct RawChild<'tree> {
    node: Node<'tree>,
    structural_index: Option<usize>,
}

#[derive(Clone)]
struct RawChildren<'tree> {
    tree: &'tree Tree,
    children: &'tree [Subtree],
    index: usize,
    structural_index: usize,
    position: Length,
}

impl<'tree> Iterator for RawChildren<'tree> {
    type Item = RawChild<'tree>;

    fn next(&mut self) -> Option<RawChild<'tree>> {
        let child = self.children.get(self.index)?;
        let structural_index = (!child.extra()).then(|| {
            self.structural_index += 1;
            self.structural_index - 1
        });
        let node = Node::new(self.tree, child, self.position);
        self.position += child.total_size();
        self.index += 1;
        Some(RawChild {
            node,
            structural_index,
        })
    }
}

impl<'tree> Node<'tree> {
    pub(crate) fn new(tree: &'tree Tree, subtree: &'tree Subtree, position: Length) -> Self {
        Self {
            tree,
            subtree,
            position,
        }
    }

    pub(crate) fn tree_ref(&self) -> &'tree Tree {
        self.tree
    }

    pub(crate) fn subtree(&self) -> &'tree Subtree {
        self.subtree
    }

    pub(crate) fn padding_start(&self) -> Length {
        self.position
    }

    fn raw_children(&self) -> RawChildren<'tree> {
        RawChildren {
            tree: self.tree,
            children: self.subtree.children(),
            index: 0,
            structural_index: 0,
            position: self.position,
        }
    }

    fn is_relevant(&self, named_only: bool) -> bool {
        self.subtree.visible() && (!named_only || self.subtree.named())
    }

    fn relevant_child_count(&self, named_only: bool) -> usize {
        if named_only {
            self.named_child_count()
        } else {
            self.child_count()
        }
    }

    // -----------------------------------------------------------------------
    // Identity and kind
    // -----------------------------------------------------------------------

    /// A value unique to this node's subtree. Subtrees reused by an
    /// incremental parse keep their id.
    #[must_use]
    pub fn id(&self) -> usize {
        self.subtree.id()
    }

    #[must_use]
    pub fn kind_id(&self) -> Symbol {
        self.subtree.symbol()
    }

    #[must_use]
    pub fn kind(&self) -> &'tree str {
        self.tree
            .language()
            .data()
            .symbol_name(self.subtree.symbol())
            .unwrap_or("")
    }

    #[must_use]
    pub fn language(&self) -> &'tree Language {
        self.tree.language()
    }

    #[must_use]
    pub fn is_named(&self) -> bool {
        self.subtree.named()
    }

    /// Whether the node is a separator-like token allowed anywhere, such as a
    /// comment, or an error node kept outside the grammar's structure.
    #[must_use]
    pub fn is_extra(&self) -> bool {
        self.subtree.extra()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.subtree.symbol() == BUILTIN_SYM_ERROR
    }

    /// Whether the parser inserted this zero-width node to recover from an
    /// error.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.subtree.is_missing()
    }

    /// Whether the node is or contains an error or missing node.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.subtree.has_error()
    }

    /// Whether the node was touched by an edit since it was parsed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.subtree.has_changes()
    }

    // -----------------------------------------------------------------------
    // Position
    // -----------------------------------------------------------------------

    fn start(&self) -> Length {
        self.position + self.subtree.padding()
    }

    fn end(&self) -> Length {
        self.start() + self.subtree.size()
    }

    #[must_use]
    pub fn start_byte(&self) -> usize {
        self.start().bytes
    }

    #[must_use]
    pub fn end_byte(&self) -> usize {
        self.end().bytes
    }

    #[must_use]
    pub fn byte_range(&self) -> ByteRange<usize> {
        self.start_byte()..self.end_byte()
    }

    #[must_use]
    pub fn start_position(&self) -> Point {
        self.start().extent
    }

    #[must_use]
    pub fn end_position(&self) -> Point {
        self.end().extent
    }

    #[must_use]
    pub fn range(&self) -> Range {
        let (start, end) = (self.start(), self.end());
        Range {
            start_byte: start.bytes,
            end_byte: end.bytes,
            start_point: start.extent,
            end_point: end.extent,
        }
    }

    // -----------------------------------------------------------------------
    // Children
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.subtree.visible_child_count() as usize
    }

    #[must_use]
    pub fn named_child_count(&self) -> usize {
        self.subtree.named_child_count() as usize
    }

    /// The number of visible nodes in this subtree, itself included.
    #[must_use]
    pub fn descendant_count(&self) -> usize {
        self.subtree.visible_descendant_count() as usize + 1
    }

    fn nth_child(&self, mut index: usize, named_only: bool) -> Option<Self> {
        let mut node = *self;
        'descend: loop {
            let mut seen = 0;
            for raw in node.raw_children() {
                let child = raw.node;
                if child.is_relevant(named_only) {
                    if seen == index {
                        return Some(child);
                    }
                    seen += 1;
                } else {
                    let count = child.relevant_child_count(named_only);
                    if index - seen < count {
                        index -= seen;
                        node = child;
                        continue 'descend;
                    }
                    seen += count;
                }
            }
            return None;
        }
    }

    /// The `index`-th visible child, named or anonymous.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<Self> {
        self.nth_child(index, false)
    }

    #[must_use]
    pub fn named_child(&self, index: usize) -> Option<Self> {
        self.nth_child(index, true)
    }

    /// Iterates over the visible children.
    pub fn children(&self) -> Children<'tree> {
        Children {
            cursor: self.walk(),
            remaining: self.child_count(),
            started: false,
        }
    }

    pub fn named_children(&self) -> impl Iterator<Item = Node<'tree>> + 'tree {
        self.children().filter(Node::is_named)
    }

    // -----------------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------------

    /// Every visible node stored under `field_id`, in source order.
    fn field_children(&self, field_id: FieldId) -> Vec<Self> {
        let language = self.tree.language().data();
        let mut found = Vec::new();
        let mut pending = vec![(*self, self.raw_children())];
        while let Some((parent, children)) = pending.last_mut() {
            let map = language.field_map(parent.subtree.production_id());
            let Some(raw) = children.next() else {
                pending.pop();
                continue;
            };
            let Some(structural_index) = raw.structural_index else {
                continue;
            };
            let mut entries = map
                .iter()
                .filter(|entry| entry.field_id == field_id)
                .filter(|entry| usize::from(entry.child_index) == structural_index);
            let Some(entry) = entries.next() else {
                continue;
            };
            let child = raw.node;
            if entry.inherited {
                pending.push((child, child.raw_children()));
            } else if child.subtree.visible() {
                found.push(child);
            } else if let Some(first) = child.child(0) {
                found.push(first);
            }
        }
        found
    }

    #[must_use]
    pub fn child_by_field_id(&self, field_id: FieldId) -> Option<Self> {
        if field_id == 0 || self.subtree.child_count() == 0 {
            return None;
        }
        self.field_children(field_id).into_iter().next()
    }

    /// The first child stored under the given field name.
    #[must_use]
    pub fn child_by_field_name(&self, field_name: impl AsRef<str>) -> Option<Self> {
        let field_id = self.tree.language().field_id_for_name(field_name)?;
        self.child_by_field_id(field_id)
    }

    /// Every child stored under the given field name.
    pub fn children_by_field_name(&self, field_name: impl AsRef<str>) -> Vec<Self> {
        match self.tree.language().field_id_for_name(field_name) {
            Some(field_id) if self.subtree.child_count() > 0 => self.field_children(field_id),
            _ => Vec::new(),
        }
    }

    /// The field name of the `index`-th visible child, if it has one.
    #[must_use]
    pub fn field_name_for_child(&self, index: usize) -> Option<&'tree str> {
        let mut cursor = self.walk();
        if !cursor.goto_first_child() {
            return None;
        }
        for _ in 0..index {
            if !cursor.goto_next_sibling() {
                return None;
            }
        }
        cursor.field_name()
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// The nearest visible ancestor, found by descending from the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let root = self.tree.root_node();
        if Subtree::ptr_eq(self.subtree, root.subtree) {
            return None;
        }
        let target_start = self.position.bytes;
        let target_end = target_start + self.subtree.total_bytes();

        let mut pending = vec![(root, root)];
        while let Some((ancestor, node)) = pending.pop() {
            for raw in node.raw_children() {
                let child = raw.node;
                let child_start = child.position.bytes;
                let child_end = child_start + child.subtree.total_bytes();
                if Subtree::ptr_eq(child.subtree, self.subtree) && child_start == target_start {
                    return Some(ancestor);
                }
                if child.subtree.child_count() > 0 && child_start <= target_start && target_end <= child_end {
                    let next = if child.subtree.visible() { child } else { ancestor };
                    pending.push((next, child));
                }
            }
        }
        None
    }

    fn sibling(&self, offset: isize, named_only: bool) -> Option<Self> {
        let parent = self.parent()?;
        let siblings: Vec<Self> = parent
            .children()
            .filter(|child| child == self || child.is_relevant(named_only))
            .collect();
        let index = siblings.iter().position(|child| child == self)?;
        let target = index.checked_add_signed(offset)?;
        siblings.get(target).copied()
    }

    #[must_use]
    pub fn next_sibling(&self) -> Option<Self> {
        self.sibling(1, false)
    }

    #[must_use]
    pub fn prev_sibling(&self) -> Option<Self> {
        self.sibling(-1, false)
    }

    #[must_use]
    pub fn next_named_sibling(&self) -> Option<Self> {
        self.sibling(1, true)
    }

    #[must_use]
    pub fn prev_named_sibling(&self) -> Option<Self> {
        self.sibling(-1, true)
    }

    // -----------------------------------------------------------------------
    // Descendant lookup
    // -----------------------------------------------------------------------

    /// The smallest node within this one that spans the given bytes.
    #[must_use]
    pub fn descendant_for_byte_range(&self, start: usize, end: usize) -> Option<Self> {
        self.descendant_for_range(start, end, false, |length| length.bytes)
    }

    /// The smallest named node within this one that spans the given bytes.
    #[must_use]
    pub fn named_descendant_for_byte_range(&self, start: usize, end: usize) -> Option<Self> {
        self.descendant_for_range(start, end, true, |length| length.bytes)
    }

    /// The smallest node within this one that spans the given positions.
    #[must_use]
    pub fn descendant_for_point_range(&self, start: Point, end: Point) -> Option<Self> {
        self.descendant_for_range(start, end, false, |length| length.extent)
    }

    #[must_use]
    pub fn named_descendant_for_point_range(&self, start: Point, end: Point) -> Option<Self> {
        self.descendant_for_range(start, end, true, |length| length.extent)
    }

    fn descendant_for_range<T: Ord + Copy>(
        &self,
        range_start: T,
        range_end: T,
        named_only: bool,
        key: impl Fn(Length) -> T,
    ) -> Option<Self> {
        if range_start > range_end {
            return None;
        }
        let mut node = *self;
        let mut last_relevant = *self;
        'descend: loop {
            for raw in node.raw_children() {
                let child = raw.node;
                let child_end = key(child.end());
                let child_start = key(child.start());
                if child_end < range_end {
                    continue;
                }
                let is_empty = child_start == child_end;
                if if is_empty {
                    child_end < range_start
                } else {
                    child_end <= range_start
                } {
                    continue;
                }
                if range_start < child_start {
                    break;
                }
                node = child;
                if node.is_relevant(named_only) {
                    last_relevant = node;
                }
                continue 'descend;
            }
            return Some(last_relevant);
        }
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// The node's text within the source it was parsed from.
    pub fn utf8_text<'a>(&self, source: &'a [u8]) -> Result<&'a str, Utf8Error> {
        std::str::from_utf8(source.get(self.byte_range()).unwrap_or_default())
    }

    /// Renders the named structure below this node as an S-expression, such
    /// as `(source_file (expression_statement (identifier)))`. Fields are
    /// written as `name: (kind)` and inserted nodes as `(MISSING kind)`.
    #[must_use]
    pub fn to_sexp(&self) -> String {
        let mut out = String::new();
        let mut cursor = self.walk();
        let mut opened = Vec::new();
        let mut visited_children = false;
        loop {
            if !visited_children {
                let node = cursor.node();
                let printed = node.is_named() || node.is_missing();
                if printed {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    if let Some(field) = cursor.field_name() {
                        out.push_str(field);
                        out.push_str(": ");
                    }
                    out.push('(');
                    if node.is_missing() {
                        out.push_str("MISSING ");
                        if node.is_named() {
                            out.push_str(node.kind());
                        } else {
                            out.push('"');
                            out.push_str(&node.kind().escape_default().to_string());
                            out.push('"');
                        }
                    } else {
                        out.push_str(node.kind());
                    }
                }
                opened.push(printed);
                if cursor.goto_first_child() {
                    continue;
                }
                visited_children = true;
            }

            if opened.pop() == Some(true) {
                out.push(')');
            }
            if cursor.goto_next_sibling() {
                visited_children = false;
            } else if !cursor.goto_parent() {
                break;
            }
        }
        out
    }

    /// A cursor starting at this node.
    #[must_use]
    pub fn walk(&self) -> TreeCursor<'tree> {
        TreeCursor::new(*self)
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        Subtree::ptr_eq(self.subtree, other.subtree) && self.position.bytes == other.position.bytes
    }
}

impl Eq for Node<'_> {}

impl Hash for Node<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subtree.id().hash(state);
        self.position.bytes.hash(state);
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{Node {} {} - {}}}",
            self.kind(),
            self.start_position(),
            self.end_position()
        )
    }
}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sexp())
    }
}

/// Iterator over a node's visible children, returned by [`Node::children`].
#[derive(Clone)]
pub struct Children<'tree> {
    cursor: TreeCursor<'tree>,
    remaining: usize,
    started: bool,
}

impl<'tree> Iterator for Children<'tree> {
    type Item = Node<'tree>;

    fn next(&mut self) -> Option<Node<'tree>> {
        if self.remaining == 0 {
            return None;
        }
        let moved = if self.started {
            self.cursor.goto_next_sibling()
        } else {
            self.started = true;
            self.cursor.goto_first_child()
        };
        if moved {
            self.remaining -= 1;
            Some(self.cursor.node())
        } else {
            self.remaining = 0;
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}
