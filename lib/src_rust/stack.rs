//! The parse stack.
//!
//! Each entry pairs a subtree with the parse state reached after pushing it.
//! Extras (separators the grammar allows anywhere, and error nodes) are pushed
//! without a state change, so an extra's state equals the state below it.

use super::language::START_STATE;
use super::length::Length;
use super::subtree::Subtree;
use crate::StateId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub(crate) struct StackEntry {
    pub subtree: Subtree,
    pub state: StateId,
    /// Position right after `subtree`.
    pub position: Length,
}

/// The state found `depth` non-extra entries below the top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StackSummaryEntry {
    pub depth: u32,
    pub state: StateId,
}

/// The subtrees removed by [`Stack::pop_count`].
#[derive(Debug, Default)]
pub(crate) struct StackSlice {
    /// The popped children, extras between them included, in source order.
    pub subtrees: Vec<Subtree>,
    /// Extras that sat above the last child, in source order.
    pub trailing_extras: Vec<Subtree>,
}

#[derive(Debug, Default)]
pub(crate) struct Stack {
    entries: Vec<StackEntry>,
}

// ===========================================================================
// Queries
// ===========================================================================

impl Stack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn state(&self) -> StateId {
        self.entries.last().map_or(START_STATE, |entry| entry.state)
    }

    #[inline]
    pub(crate) fn position(&self) -> Length {
        self.entries.last().map_or(Length::ZERO, |entry| entry.position)
    }

    #[inline]
    pub(crate) fn top(&self) -> Option<&Subtree> {
        self.entries.last().map(|entry| &entry.subtree)
    }

    pub(crate) fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    /// The states the LR automaton sees: the start state followed by the state
    /// after every non-extra entry.
    pub(crate) fn states_without_extras(&self) -> Vec<StateId> {
        let mut states = Vec::with_capacity(self.entries.len() + 1);
        states.push(START_STATE);
        states.extend(
            self.entries
                .iter()
                .filter(|entry| !entry.subtree.extra())
                .map(|entry| entry.state),
        );
        states
    }

    /// Lists the states below the top, one per non-extra entry, up to
    /// `max_depth` entries deep. The entry at depth `0` is the current state.
    pub(crate) fn summarize(&self, max_depth: u32) -> Vec<StackSummaryEntry> {
        let mut summary = vec![StackSummaryEntry {
            depth: 0,
            state: self.state(),
        }];
        let mut depth = 0;
        for (index, entry) in self.entries.iter().enumerate().rev() {
            if entry.subtree.extra() {
                continue;
            }
            depth += 1;
            if depth > max_depth {
                break;
            }
            let below = index.checked_sub(1).map(|i| &self.entries[i]);
            summary.push(StackSummaryEntry {
                depth,
                state: below.map_or(START_STATE, |entry| entry.state),
            });
        }
        summary
    }
}

// ===========================================================================
// Mutation
// ===========================================================================

impl Stack {
    pub(crate) fn push(&mut self, subtree: Subtree, state: StateId) {
        let position = self.position() + subtree.total_size();
        self.entries.push(StackEntry {
            subtree,
            state,
            position,
        });
    }

    pub(crate) fn pop(&mut self) -> Option<Subtree> {
        self.entries.pop().map(|entry| entry.subtree)
    }

    /// Pops `count` non-extra subtrees for a reduction. Extras between them
    /// are popped too; extras above them are returned separately so that they
    /// can be pushed back after the reduced node.
    pub(crate) fn pop_count(&mut self, count: usize) -> StackSlice {
        let mut slice = StackSlice::default();
        while let Some(entry) = self.entries.last() {
            if !entry.subtree.extra() {
                break;
            }
            if let Some(entry) = self.entries.pop() {
                slice.trailing_extras.push(entry.subtree);
            }
        }
        slice.trailing_extras.reverse();

        let mut remaining = count;
        while remaining > 0 {
            let Some(entry) = self.entries.pop() else {
                break;
            };
            if !entry.subtree.extra() {
                remaining -= 1;
            }
            slice.subtrees.push(entry.subtree);
        }
        slice.subtrees.reverse();
        slice
    }

    /// Pops `depth` non-extra entries and everything above them, in source
    /// order.
    pub(crate) fn pop_depth(&mut self, depth: usize) -> Vec<Subtree> {
        let slice = self.pop_count(depth);
        let mut subtrees = slice.subtrees;
        subtrees.extend(slice.trailing_extras);
        subtrees
    }

    /// Empties the stack, returning every subtree in source order.
    pub(crate) fn pop_all(&mut self) -> Vec<Subtree> {
        self.entries.drain(..).map(|entry| entry.subtree).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::src_rust::language::{LanguageData, SymbolMetadata};
    use crate::src_rust::subtree::LeafParams;
    use crate::Point;

    fn language() -> LanguageData {
        LanguageData {
            abi_version: crate::LANGUAGE_VERSION,
            name: Cow::Borrowed("test"),
            symbol_count: 3,
            token_count: 3,
            external_token_count: 0,
            state_count: 2,
            field_count: 0,
            production_id_count: 0,
            parse_table: Cow::Owned(vec![0; 6]),
            parse_actions: Cow::Owned(vec![]),
            lex_modes: Cow::Owned(vec![Default::default(); 2]),
            lex_valid_tokens: Cow::Owned(vec![true; 3]),
            lex_nfa_states: Cow::Owned(vec![]),
            lex_char_ranges: Cow::Owned(vec![]),
            lex_tokens: Cow::Owned(vec![Default::default(); 3]),
            separator_start: None,
            symbol_names: Cow::Owned(vec!["end".into(), "a".into(), "comment".into()]),
            symbol_metadata: Cow::Owned(vec![
                SymbolMetadata::default(),
                SymbolMetadata {
                    visible: true,
                    named: true,
                },
                SymbolMetadata {
                    visible: true,
                    named: true,
                },
            ]),
            field_names: Cow::Owned(vec!["".into()]),
            field_map_slices: Cow::Owned(vec![]),
            field_map_entries: Cow::Owned(vec![]),
            external_scanner_states: Cow::Owned(vec![]),
            external_symbol_map: Cow::Owned(vec![]),
            external_scanner: None,
        }
    }

    fn leaf(language: &LanguageData, symbol: u16, bytes: usize) -> Subtree {
        Subtree::new_leaf(
            LeafParams {
                symbol,
                padding: Length::ZERO,
                size: Length::new(bytes, Point::new(0, bytes)),
                lookahead_bytes: 0,
                lex_state: 1,
                depends_on_column: false,
                external_scanner_state: None,
            },
            language,
        )
    }

    #[test]
    fn pop_count_separates_trailing_extras() {
        let language = language();
        let mut stack = Stack::new();
        stack.push(leaf(&language, 1, 1), 5);
        stack.push(leaf(&language, 2, 2).with_extra(true), 5);
        stack.push(leaf(&language, 1, 3), 6);
        stack.push(leaf(&language, 2, 4).with_extra(true), 6);
        assert_eq!(stack.position().bytes, 10);
        assert_eq!(stack.states_without_extras(), vec![START_STATE, 5, 6]);

        let slice = stack.pop_count(2);
        let sizes = |trees: &[Subtree]| trees.iter().map(|t| t.size().bytes).collect::<Vec<_>>();
        assert_eq!(sizes(&slice.subtrees), vec![1, 2, 3]);
        assert_eq!(sizes(&slice.trailing_extras), vec![4]);
        assert!(stack.entries().is_empty());
        assert_eq!(stack.state(), START_STATE);
    }

    #[test]
    fn summary_skips_extras() {
        let language = language();
        let mut stack = Stack::new();
        stack.push(leaf(&language, 1, 1), 5);
        stack.push(leaf(&language, 2, 1).with_extra(true), 5);
        stack.push(leaf(&language, 1, 1), 7);
        let summary = stack.summarize(8);
        let states: Vec<_> = summary.iter().map(|entry| (entry.depth, entry.state)).collect();
        assert_eq!(states, vec![(0, 7), (1, 5), (2, START_STATE)]);
    }
}
