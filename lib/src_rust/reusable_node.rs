//! A cursor over the previous tree that offers subtrees for reuse in source
//! order.

use super::subtree::Subtree;

#[derive(Clone, Debug)]
struct StackEntry {
    tree: Subtree,
    child_index: usize,
    /// Byte offset of the padding start.
    byte_offset: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ReusableNode {
    stack: Vec<StackEntry>,
    last_external_token: Option<Subtree>,
}

impl ReusableNode {
    pub(crate) fn new(root: Subtree) -> Self {
        Self {
            stack: vec![StackEntry {
                tree: root,
                child_index: 0,
                byte_offset: 0,
            }],
            last_external_token: None,
        }
    }

    #[inline]
    pub(crate) fn tree(&self) -> Option<&Subtree> {
        self.stack.last().map(|entry| &entry.tree)
    }

    #[inline]
    pub(crate) fn byte_offset(&self) -> usize {
        self.stack.last().map_or(usize::MAX, |entry| entry.byte_offset)
    }

    /// The last external token before the current subtree.
    pub(crate) fn last_external_token(&self) -> Option<&Subtree> {
        self.last_external_token.as_ref()
    }

    /// Moves past the current subtree to the next one in source order.
    pub(crate) fn advance(&mut self) {
        let Some(last) = self.stack.last() else {
            return;
        };
        let byte_offset = last.byte_offset + last.tree.total_bytes();
        if let Some(token) = last.tree.last_external_token() {
            self.last_external_token = Some(token.clone());
        }

        while let Some(popped) = self.stack.pop() {
            let Some(parent) = self.stack.last() else {
                return;
            };
            let next_index = popped.child_index + 1;
            if let Some(next) = parent.tree.children().get(next_index) {
                let next = next.clone();
                self.stack.push(StackEntry {
                    tree: next,
                    child_index: next_index,
                    byte_offset,
                });
                return;
            }
        }
    }

    /// Moves to the first child of the current subtree. Returns `false` for
    /// leaves.
    pub(crate) fn descend(&mut self) -> bool {
        let Some(last) = self.stack.last() else {
            return false;
        };
        let Some(first) = last.tree.children().first() else {
            return false;
        };
        let entry = StackEntry {
            tree: first.clone(),
            child_index: 0,
            byte_offset: last.byte_offset,
        };
        self.stack.push(entry);
        true
    }
}
