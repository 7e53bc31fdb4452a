//! Stateful tree traversal.

use streaming_iterator::StreamingIterator;

use super::length::Length;
use super::node::Node;
use super::subtree::Subtree;
use super::tree::Tree;
use crate::{FieldId, Point};

#[derive(Clone, Copy)]
struct CursorEntry<'tree> {
    subtree: &'tree Subtree,
    /// Absolute position of the padding start.
    position: Length,
    child_index: usize,
    structural_child_index: usize,
    descendant_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    None,
    Visible,
    Hidden,
}

/// Walks a parent's raw children, producing cursor entries.
struct ChildEntries<'tree> {
    parent: &'tree Subtree,
    position: Length,
    child_index: usize,
    structural_child_index: usize,
    descendant_index: usize,
}

impl<'tree> ChildEntries<'tree> {
    /// Returns the next child's entry and whether it is visible.
    fn next(&mut self) -> Option<(CursorEntry<'tree>, bool)> {
        let child = self.parent.children().get(self.child_index)?;
        let entry = CursorEntry {
            subtree: child,
            position: self.position,
            child_index: self.child_index,
            structural_child_index: self.structural_child_index,
            descendant_index: self.descendant_index,
        };
        let visible = child.visible();
        if !child.extra() {
            self.structural_child_index += 1;
        }
        self.descendant_index += child.visible_descendant_count() as usize + usize::from(visible);
        self.position += child.total_size();
        self.child_index += 1;
        Some((entry, visible))
    }
}

/// A cursor for walking a syntax tree efficiently.
///
/// The cursor can only move within the subtree of the node it was created
/// from. Moving it never allocates beyond its internal stack.
#[derive(Clone)]
pub struct TreeCursor<'tree> {
    tree: &'tree Tree,
    stack: Vec<CursorEntry<'tree>>,
}

impl<'tree> TreeCursor<'tree> {
    pub(crate) fn new(node: Node<'tree>) -> Self {
        let mut cursor = Self {
            tree: node.tree_ref(),
            stack: Vec::with_capacity(8),
        };
        cursor.reset(node);
        cursor
    }

    fn entry(&self) -> CursorEntry<'tree> {
        // The stack always holds the node the cursor was created from.
        self.stack[self.stack.len() - 1]
    }

    fn is_entry_visible(&self, index: usize) -> bool {
        index == 0 || self.stack[index].subtree.visible()
    }

    fn child_entries(&self) -> ChildEntries<'tree> {
        let entry = self.entry();
        let descendant_index =
            entry.descendant_index + usize::from(self.is_entry_visible(self.stack.len() - 1));
        ChildEntries {
            parent: entry.subtree,
            position: entry.position,
            child_index: 0,
            structural_child_index: 0,
            descendant_index,
        }
    }

    /// The node the cursor is on.
    #[must_use]
    pub fn node(&self) -> Node<'tree> {
        let entry = self.entry();
        Node::new(self.tree, entry.subtree, entry.position)
    }

    /// Moves the cursor back to `node`, which becomes its new root.
    pub fn reset(&mut self, node: Node<'tree>) {
        self.tree = node.tree_ref();
        self.stack.clear();
        self.stack.push(CursorEntry {
            subtree: node.subtree(),
            position: node.padding_start(),
            child_index: 0,
            structural_child_index: 0,
            descendant_index: 0,
        });
    }

    /// How many visible levels below its root the cursor is.
    #[must_use]
    pub fn depth(&self) -> usize {
        (1..self.stack.len())
            .filter(|&index| self.is_entry_visible(index))
            .count()
    }

    /// The pre-order index of the current node among the visible
    /// descendants of the cursor's root.
    #[must_use]
    pub fn descendant_index(&self) -> usize {
        self.entry().descendant_index
    }

    /// The field the current node is stored under in its parent.
    #[must_use]
    pub fn field_id(&self) -> Option<FieldId> {
        let language = self.tree.language().data();
        let last = self.stack.len() - 1;
        for index in (1..self.stack.len()).rev() {
            if index != last && self.is_entry_visible(index) {
                break;
            }
            let entry = self.stack[index];
            if entry.subtree.extra() {
                break;
            }
            let parent = self.stack[index - 1];
            let field = language
                .field_map(parent.subtree.production_id())
                .iter()
                .find(|field| {
                    !field.inherited && usize::from(field.child_index) == entry.structural_child_index
                });
            if let Some(field) = field {
                return Some(field.field_id);
            }
        }
        None
    }

    #[must_use]
    pub fn field_name(&self) -> Option<&'tree str> {
        let field_id = self.field_id()?;
        self.tree.language().data().field_name(field_id)
    }

    // -----------------------------------------------------------------------
    // Movement
    // -----------------------------------------------------------------------

    fn goto_first_child_step(&mut self) -> Step {
        let mut children = self.child_entries();
        while let Some((entry, visible)) = children.next() {
            if visible {
                self.stack.push(entry);
                return Step::Visible;
            }
            if entry.subtree.visible_child_count() > 0 {
                self.stack.push(entry);
                return Step::Hidden;
            }
        }
        Step::None
    }

    fn goto_last_child_step(&mut self) -> Step {
        let mut children = self.child_entries();
        let mut last = None;
        while let Some((entry, visible)) = children.next() {
            if visible {
                last = Some((entry, Step::Visible));
            } else if entry.subtree.visible_child_count() > 0 {
                last = Some((entry, Step::Hidden));
            }
        }
        match last {
            Some((entry, step)) => {
                self.stack.push(entry);
                step
            }
            None => Step::None,
        }
    }

    fn goto_next_sibling_step(&mut self) -> Step {
        let saved = self.stack.clone();
        let initial_len = self.stack.len();
        while self.stack.len() > 1 {
            let Some(current) = self.stack.pop() else {
                break;
            };
            let mut children = self.child_entries();
            children.child_index = current.child_index;
            children.structural_child_index = current.structural_child_index;
            children.position = current.position;
            children.descendant_index = current.descendant_index;

            let Some((_, visible)) = children.next() else {
                break;
            };
            if visible && self.stack.len() + 1 < initial_len {
                break;
            }
            while let Some((entry, visible)) = children.next() {
                if visible {
                    self.stack.push(entry);
                    return Step::Visible;
                }
                if entry.subtree.visible_child_count() > 0 {
                    self.stack.push(entry);
                    return Step::Hidden;
                }
            }
        }
        self.stack = saved;
        Step::None
    }

    /// Moves to the first visible child. Returns `false` if there is none.
    pub fn goto_first_child(&mut self) -> bool {
        loop {
            match self.goto_first_child_step() {
                Step::Hidden => continue,
                Step::Visible => return true,
                Step::None => return false,
            }
        }
    }

    /// Moves to the last visible child. Returns `false` if there is none.
    pub fn goto_last_child(&mut self) -> bool {
        loop {
            match self.goto_last_child_step() {
                Step::Hidden => continue,
                Step::Visible => return true,
                Step::None => return false,
            }
        }
    }

    /// Moves to the next visible sibling. Returns `false` if there is none.
    pub fn goto_next_sibling(&mut self) -> bool {
        match self.goto_next_sibling_step() {
            Step::Hidden => {
                self.goto_first_child();
                true
            }
            Step::Visible => true,
            Step::None => false,
        }
    }

    /// Moves to the nearest visible ancestor. Returns `false` at the root.
    pub fn goto_parent(&mut self) -> bool {
        for index in (0..self.stack.len().saturating_sub(1)).rev() {
            if self.is_entry_visible(index) {
                self.stack.truncate(index + 1);
                return true;
            }
        }
        false
    }

    fn goto_first_child_where(&mut self, at_goal: impl Fn(Length) -> bool) -> Option<usize> {
        let initial_len = self.stack.len();
        let mut visible_child_index = 0;
        'descend: loop {
            let mut children = self.child_entries();
            while let Some((entry, visible)) = children.next() {
                let end = entry.position + entry.subtree.total_size();
                let visible_child_count = entry.subtree.visible_child_count() as usize;
                if at_goal(end) {
                    if visible {
                        self.stack.push(entry);
                        return Some(visible_child_index);
                    }
                    if visible_child_count > 0 {
                        self.stack.push(entry);
                        continue 'descend;
                    }
                } else if visible {
                    visible_child_index += 1;
                } else {
                    visible_child_index += visible_child_count;
                }
            }
            break;
        }
        self.stack.truncate(initial_len);
        None
    }

    /// Moves to the first visible child that ends after `byte`, returning its
    /// index.
    pub fn goto_first_child_for_byte(&mut self, byte: usize) -> Option<usize> {
        self.goto_first_child_where(|end| end.bytes > byte)
    }

    /// Moves to the first visible child that ends after `point`, returning
    /// its index.
    pub fn goto_first_child_for_point(&mut self, point: Point) -> Option<usize> {
        self.goto_first_child_where(|end| end.extent > point)
    }
}

/// A lazy pre-order traversal of the visible nodes below a starting node.
///
/// Implemented as a [`StreamingIterator`]; [`PreorderWalk::restart`] starts
/// over from the same node.
#[derive(Clone)]
pub struct PreorderWalk<'tree> {
    start: Node<'tree>,
    cursor: TreeCursor<'tree>,
    current: Option<Node<'tree>>,
    started: bool,
}

impl<'tree> PreorderWalk<'tree> {
    #[must_use]
    pub fn new(start: Node<'tree>) -> Self {
        Self {
            start,
            cursor: start.walk(),
            current: None,
            started: false,
        }
    }

    /// Depth of the current node below the starting node.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.cursor.depth()
    }

    pub fn restart(&mut self) {
        self.cursor.reset(self.start);
        self.current = None;
        self.started = false;
    }
}

impl<'tree> StreamingIterator for PreorderWalk<'tree> {
    type Item = Node<'tree>;

    fn advance(&mut self) {
        if !self.started {
            self.started = true;
            self.current = Some(self.cursor.node());
            return;
        }
        if self.current.is_none() {
            return;
        }
        if self.cursor.goto_first_child() || self.cursor.goto_next_sibling() {
            self.current = Some(self.cursor.node());
            return;
        }
        loop {
            if !self.cursor.goto_parent() {
                self.current = None;
                return;
            }
            if self.cursor.goto_next_sibling() {
                self.current = Some(self.cursor.node());
                return;
            }
        }
    }

    fn get(&self) -> Option<&Node<'tree>> {
        self.current.as_ref()
    }
}
