//! Syntax trees.

use std::fmt;
use std::io;

use streaming_iterator::StreamingIterator as _;

use super::get_changed_ranges::{changed_ranges, edit_range, included_range_differences};
use super::language::Language;
use super::length::Length;
use super::node::Node;
use super::subtree::{Subtree, SubtreeEdit};
use super::tree_cursor::{PreorderWalk, TreeCursor};
use crate::{InputEdit, Range};

/// The result of a parse: an immutable syntax tree.
///
/// Cloning is cheap; clones share every node. Editing returns a new tree and
/// leaves this one untouched.
#[derive(Clone)]
pub struct Tree {
    root: Subtree,
    language: Language,
    included_ranges: Vec<Range>,
}

impl Tree {
    pub(crate) fn new(root: Subtree, language: Language, included_ranges: Vec<Range>) -> Self {
        Self {
            root,
            language,
            included_ranges,
        }
    }

    pub(crate) fn root_subtree(&self) -> &Subtree {
        &self.root
    }

    #[must_use]
    pub fn root_node(&self) -> Node<'_> {
        Node::new(self, &self.root, Length::ZERO)
    }

    #[must_use]
    pub fn language(&self) -> &Language {
        &self.language
    }

    /// The ranges of the document that were parsed.
    #[must_use]
    pub fn included_ranges(&self) -> &[Range] {
        &self.included_ranges
    }

    /// Returns a copy of this tree adjusted for an edit of the source text,
    /// ready to be passed to an incremental parse of the new text.
    ///
    /// Nodes the edit touches are marked as changed. Everything else is
    /// shared with this tree.
    #[must_use]
    pub fn edit(&self, edit: &InputEdit) -> Tree {
        let mut edit = *edit;
        if edit.old_end_byte < edit.start_byte {
            edit.old_end_byte = edit.start_byte;
            edit.old_end_position = edit.start_position;
        }
        if edit.new_end_byte < edit.start_byte {
            edit.new_end_byte = edit.start_byte;
            edit.new_end_position = edit.start_position;
        }

        let subtree_edit = SubtreeEdit {
            start: Length::new(edit.start_byte, edit.start_position),
            old_end: Length::new(edit.old_end_byte, edit.old_end_position),
            new_end: Length::new(edit.new_end_byte, edit.new_end_position),
        };
        let root = self.root.edit(Length::ZERO, &subtree_edit, true).into_root();

        let mut included_ranges = self.included_ranges.clone();
        for range in &mut included_ranges {
            edit_range(range, &edit);
        }
        tracing::trace!(
            target: "canopy::tree",
            start = edit.start_byte,
            old_end = edit.old_end_byte,
            new_end = edit.new_end_byte,
            "edit"
        );
        Tree::new(root, self.language.clone(), included_ranges)
    }

    /// A cursor starting at the root node.
    #[must_use]
    pub fn walk(&self) -> TreeCursor<'_> {
        self.root_node().walk()
    }

    /// A pre-order walk over every visible node.
    #[must_use]
    pub fn preorder(&self) -> PreorderWalk<'_> {
        PreorderWalk::new(self.root_node())
    }

    /// The ranges whose syntactic structure differs between `self`, an edited
    /// tree, and `new_tree`, the result of parsing the edited text.
    ///
    /// The ranges are sorted, do not overlap, and are measured in the new
    /// document.
    #[must_use]
    pub fn changed_ranges(&self, new_tree: &Tree) -> Vec<Range> {
        let differences = included_range_differences(&self.included_ranges, &new_tree.included_ranges);
        changed_ranges(&self.root, &new_tree.root, &differences)
    }

    /// Writes the tree, hidden nodes included, as a Graphviz `digraph`.
    pub fn print_dot_graph(&self, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "digraph tree {{")?;
        writeln!(out, "edge [arrowhead=none]")?;
        self.root.write_dot_graph(&self.language, 0, out)?;
        writeln!(out, "}}")
    }

    /// The number of visible nodes, the root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut walk = self.preorder();
        let mut count = 0;
        while walk.next().is_some() {
            count += 1;
        }
        count
    }
}

impl PartialEq for Tree {
    /// Trees are equal when they come from the same language and have the
    /// same structure and extents.
    fn eq(&self, other: &Self) -> bool {
        self.language == other.language && self.root == other.root
    }
}

impl Eq for Tree {}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Tree {:?}}}", self.root_node())
    }
}
