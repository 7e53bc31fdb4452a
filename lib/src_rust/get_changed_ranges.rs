//! Computes the ranges whose syntactic structure differs between two trees.
//!
//! Two iterators walk the old and new trees in lockstep, one visible node at a
//! time. Subtrees that are provably identical are skipped whole; subtrees that
//! may differ are descended into; subtrees that differ are reported.

use std::cmp::Ordering;

use super::language::BUILTIN_SYM_ERROR;
use super::length::{Length, LENGTH_MAX};
use super::point::{point_add, point_sub};
use super::subtree::{Subtree, TREE_STATE_NONE};
use crate::{InputEdit, Point, Range};

// ---------------------------------------------------------------------------
// Range arrays
// ---------------------------------------------------------------------------

fn length_of(bytes: usize, extent: Point) -> Length {
    Length::new(bytes, extent)
}

/// Appends `[start, end)`, merging it into the last range when they touch.
fn push_range(ranges: &mut Vec<Range>, start: Length, end: Length) {
    if let Some(last) = ranges.last_mut() {
        if start.bytes <= last.end_byte {
            if end.bytes > last.end_byte {
                last.end_byte = end.bytes;
                last.end_point = end.extent;
            }
            return;
        }
    }
    if start.bytes < end.bytes {
        ranges.push(Range {
            start_byte: start.bytes,
            end_byte: end.bytes,
            start_point: start.extent,
            end_point: end.extent,
        });
    }
}

/// Whether any range from `start_index` on overlaps `[start_byte, end_byte)`.
fn ranges_intersect(ranges: &[Range], start_index: usize, start_byte: usize, end_byte: usize) -> bool {
    for range in ranges.iter().skip(start_index) {
        if range.end_byte > start_byte {
            return range.start_byte < end_byte;
        }
    }
    false
}

/// The parts of the document that are included in exactly one of the two
/// range lists.
pub(crate) fn included_range_differences(old_ranges: &[Range], new_ranges: &[Range]) -> Vec<Range> {
    let mut differences = Vec::new();
    let (mut old_index, mut new_index) = (0, 0);
    let (mut in_old, mut in_new) = (false, false);
    let mut position = Length::ZERO;

    let boundary = |ranges: &[Range], index: usize, inside: bool| match ranges.get(index) {
        Some(range) if inside => length_of(range.end_byte, range.end_point),
        Some(range) => length_of(range.start_byte, range.start_point),
        None => LENGTH_MAX,
    };

    while old_index < old_ranges.len() || new_index < new_ranges.len() {
        let next_old = boundary(old_ranges, old_index, in_old);
        let next_new = boundary(new_ranges, new_index, in_new);
        let next = next_old.min(next_new);
        if in_old != in_new {
            push_range(&mut differences, position, next);
        }
        match next_old.bytes.cmp(&next_new.bytes) {
            Ordering::Less => {
                old_index += usize::from(in_old);
                in_old = !in_old;
            }
            Ordering::Greater => {
                new_index += usize::from(in_new);
                in_new = !in_new;
            }
            Ordering::Equal => {
                old_index += usize::from(in_old);
                new_index += usize::from(in_new);
                in_old = !in_old;
                in_new = !in_new;
            }
        }
        position = next;
    }
    differences
}

/// Moves an included range to account for an edit. A range that now ends
/// before the edit's new end is stretched to the end of the document.
pub(crate) fn edit_range(range: &mut Range, edit: &InputEdit) {
    if range.end_byte >= edit.old_end_byte {
        if range.end_byte != usize::MAX {
            range.end_byte = edit.new_end_byte + (range.end_byte - edit.old_end_byte);
            range.end_point = point_add(
                edit.new_end_position,
                point_sub(range.end_point, edit.old_end_position),
            );
            if range.end_byte < edit.new_end_byte {
                range.end_byte = usize::MAX;
                range.end_point = Point::MAX;
            }
        }
    } else if range.end_byte > edit.start_byte {
        range.end_byte = edit.start_byte;
        range.end_point = edit.start_position;
    }

    if range.start_byte >= edit.old_end_byte {
        range.start_byte = edit.new_end_byte + (range.start_byte - edit.old_end_byte);
        range.start_point = point_add(
            edit.new_end_position,
            point_sub(range.start_point, edit.old_end_position),
        );
        if range.start_byte < edit.new_end_byte {
            range.start_byte = usize::MAX;
            range.start_point = Point::MAX;
        }
    } else if range.start_byte > edit.start_byte {
        range.start_byte = edit.start_byte;
        range.start_point = edit.start_position;
    }
}

// ---------------------------------------------------------------------------
// Lockstep iterator
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Entry<'a> {
    subtree: &'a Subtree,
    /// Position of the padding start.
    position: Length,
    child_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Comparison {
    Differs,
    MayDiffer,
    Matches,
}

struct Iter<'a> {
    stack: Vec<Entry<'a>>,
    visible_depth: usize,
    in_padding: bool,
    prev_external_token: Option<&'a Subtree>,
}

impl<'a> Iter<'a> {
    fn new(root: &'a Subtree) -> Self {
        Self {
            stack: vec![Entry {
                subtree: root,
                position: Length::ZERO,
                child_index: 0,
            }],
            visible_depth: 1,
            in_padding: false,
            prev_external_token: None,
        }
    }

    fn done(&self) -> bool {
        self.stack.is_empty()
    }

    fn top(&self) -> Option<Entry<'a>> {
        self.stack.last().copied()
    }

    fn start_position(&self) -> Length {
        self.top().map_or(Length::ZERO, |entry| {
            if self.in_padding {
                entry.position
            } else {
                entry.position + entry.subtree.padding()
            }
        })
    }

    fn end_position(&self) -> Length {
        self.top().map_or(Length::ZERO, |entry| {
            let start = entry.position + entry.subtree.padding();
            if self.in_padding {
                start
            } else {
                start + entry.subtree.size()
            }
        })
    }

    fn is_visible(&self) -> bool {
        match self.stack.len() {
            0 => false,
            1 => true,
            _ => self.stack.last().is_some_and(|entry| entry.subtree.visible()),
        }
    }

    /// The innermost visible subtree the iterator is in, with its start byte.
    fn visible_state(&self) -> Option<(&'a Subtree, usize)> {
        let mut end = self.stack.len();
        if self.in_padding {
            end = end.checked_sub(1)?;
        }
        self.stack[..end]
            .iter()
            .enumerate()
            .rev()
            .find(|(index, entry)| *index == 0 || entry.subtree.visible())
            .map(|(_, entry)| (entry.subtree, entry.position.bytes))
    }

    fn ascend(&mut self) {
        if self.done() {
            return;
        }
        if self.is_visible() && !self.in_padding {
            self.visible_depth -= 1;
        }
        if self.top().is_some_and(|entry| entry.child_index > 0) {
            self.in_padding = false;
        }
        self.stack.pop();
    }

    /// Descends to the first visible descendant that ends after `goal`.
    fn descend(&mut self, goal: usize) -> bool {
        if self.in_padding {
            return false;
        }
        'outer: loop {
            let Some(entry) = self.top() else {
                return false;
            };
            let mut position = entry.position;
            for (child_index, child) in entry.subtree.children().iter().enumerate() {
                let child_left = position + child.padding();
                let child_right = child_left + child.size();
                if child_right.bytes > goal {
                    self.stack.push(Entry {
                        subtree: child,
                        position,
                        child_index,
                    });
                    if self.is_visible() {
                        if child_left.bytes > goal {
                            self.in_padding = true;
                        } else {
                            self.visible_depth += 1;
                        }
                        return true;
                    }
                    continue 'outer;
                }
                position = child_right;
                if let Some(token) = child.last_external_token() {
                    self.prev_external_token = Some(token);
                }
            }
            return false;
        }
    }

    fn advance(&mut self) {
        if self.in_padding {
            self.in_padding = false;
            if self.is_visible() {
                self.visible_depth += 1;
            } else {
                self.descend(0);
            }
            return;
        }

        loop {
            if self.is_visible() {
                self.visible_depth -= 1;
            }
            let Some(entry) = self.stack.pop() else {
                return;
            };
            let Some(parent) = self.top() else {
                return;
            };
            if let Some(token) = entry.subtree.last_external_token() {
                self.prev_external_token = Some(token);
            }
            let child_index = entry.child_index + 1;
            if let Some(next) = parent.subtree.children().get(child_index) {
                self.stack.push(Entry {
                    subtree: next,
                    position: entry.position + entry.subtree.total_size(),
                    child_index,
                });
                if self.is_visible() {
                    if next.padding().bytes > 0 {
                        self.in_padding = true;
                    } else {
                        self.visible_depth += 1;
                    }
                } else {
                    self.descend(0);
                }
                return;
            }
        }
    }
}

fn compare(old: &Iter<'_>, new: &Iter<'_>) -> Comparison {
    let (old_tree, old_start, new_tree, new_start) = match (old.visible_state(), new.visible_state()) {
        (None, None) => return Comparison::Matches,
        (Some((old_tree, old_start)), Some((new_tree, new_start))) => {
            (old_tree, old_start, new_tree, new_start)
        }
        _ => return Comparison::Differs,
    };
    if old_tree.symbol() != new_tree.symbol() {
        return Comparison::Differs;
    }

    if old_start != new_start
        || old_tree.symbol() == BUILTIN_SYM_ERROR
        || old_tree.size().bytes != new_tree.size().bytes
        || old_tree.parse_state() == TREE_STATE_NONE
        || new_tree.parse_state() == TREE_STATE_NONE
        || old_tree.error_cost() != new_tree.error_cost()
        || old_tree.has_external_tokens() != new_tree.has_external_tokens()
        || old_tree.has_changes()
        || (old_tree.has_external_tokens()
            && !Subtree::external_scanner_state_eq(old.prev_external_token, new.prev_external_token))
    {
        return Comparison::MayDiffer;
    }
    Comparison::Matches
}

/// The ranges of `new_root` whose structure differs from `old_root`, sorted
/// and non-overlapping. `included_differences` lists the text whose
/// inclusion changed between the parses.
pub(crate) fn changed_ranges(
    old_root: &Subtree,
    new_root: &Subtree,
    included_differences: &[Range],
) -> Vec<Range> {
    let mut results = Vec::new();
    let mut old_iter = Iter::new(old_root);
    let mut new_iter = Iter::new(new_root);
    let mut difference_index = 0;

    let mut position = old_iter.start_position();
    let mut next_position = new_iter.start_position();
    match position.bytes.cmp(&next_position.bytes) {
        Ordering::Less => {
            push_range(&mut results, position, next_position);
            position = next_position;
        }
        Ordering::Greater => push_range(&mut results, next_position, position),
        Ordering::Equal => {}
    }

    loop {
        let mut comparison = compare(&old_iter, &new_iter);

        // Identical subtrees still differ if their text changed inclusion.
        if comparison == Comparison::Matches
            && ranges_intersect(
                included_differences,
                difference_index,
                position.bytes,
                old_iter.end_position().bytes,
            )
        {
            comparison = Comparison::MayDiffer;
        }

        let mut is_changed = false;
        match comparison {
            Comparison::Matches => next_position = old_iter.end_position(),
            Comparison::MayDiffer => {
                if old_iter.descend(position.bytes) {
                    if !new_iter.descend(position.bytes) {
                        is_changed = true;
                        next_position = old_iter.end_position();
                    }
                } else if new_iter.descend(position.bytes) {
                    is_changed = true;
                    next_position = new_iter.end_position();
                } else {
                    next_position = old_iter.end_position().min(new_iter.end_position());
                }
            }
            Comparison::Differs => {
                is_changed = true;
                next_position = old_iter.end_position().min(new_iter.end_position());
            }
        }

        while !old_iter.done() && old_iter.end_position().bytes <= next_position.bytes {
            old_iter.advance();
        }
        while !new_iter.done() && new_iter.end_position().bytes <= next_position.bytes {
            new_iter.advance();
        }
        while old_iter.visible_depth > new_iter.visible_depth {
            old_iter.ascend();
        }
        while new_iter.visible_depth > old_iter.visible_depth {
            new_iter.ascend();
        }

        if is_changed {
            push_range(&mut results, position, next_position);
        }
        position = next_position;

        while included_differences
            .get(difference_index)
            .is_some_and(|range| range.end_byte <= position.bytes)
        {
            difference_index += 1;
        }

        if old_iter.done() || new_iter.done() {
            break;
        }
    }

    let old_size = old_root.total_size();
    let new_size = new_root.total_size();
    match old_size.bytes.cmp(&new_size.bytes) {
        Ordering::Less => push_range(&mut results, old_size, new_size),
        Ordering::Greater => push_range(&mut results, new_size, old_size),
        Ordering::Equal => {}
    }
    results
}

#[cfg(test)]
mod tests {
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
    fn adjacent_ranges_merge() {
        let mut ranges = Vec::new();
        push_range(&mut ranges, length_of(0, Point::new(0, 0)), length_of(3, Point::new(0, 3)));
        push_range(&mut ranges, length_of(3, Point::new(0, 3)), length_of(5, Point::new(0, 5)));
        push_range(&mut ranges, length_of(7, Point::new(0, 7)), length_of(9, Point::new(0, 9)));
        assert_eq!(ranges, vec![range(0, 5), range(7, 9)]);
    }

    #[test]
    fn empty_ranges_are_dropped() {
        let mut ranges = Vec::new();
        push_range(&mut ranges, length_of(4, Point::new(0, 4)), length_of(4, Point::new(0, 4)));
        assert!(ranges.is_empty());
    }

    #[test]
    fn included_range_differences_are_symmetric() {
        let old = [range(0, 10), range(20, 30)];
        let new = [range(0, 10), range(25, 40)];
        assert_eq!(included_range_differences(&old, &new), vec![range(20, 25), range(30, 40)]);
        assert_eq!(included_range_differences(&new, &old), vec![range(20, 25), range(30, 40)]);
        assert!(included_range_differences(&old, &old).is_empty());
    }

    #[test]
    fn intersection_stops_at_later_ranges() {
        let ranges = [range(2, 4), range(10, 12)];
        assert!(ranges_intersect(&ranges, 0, 3, 5));
        assert!(!ranges_intersect(&ranges, 0, 5, 10));
        assert!(!ranges_intersect(&ranges, 1, 0, 4));
    }

    #[test]
    fn edit_shifts_ranges_after_the_edit() {
        let mut included = range(10, 20);
        edit_range(
            &mut included,
            &InputEdit {
                start_byte: 2,
                old_end_byte: 4,
                new_end_byte: 7,
                start_position: Point::new(0, 2),
                old_end_position: Point::new(0, 4),
                new_end_position: Point::new(0, 7),
            },
        );
        assert_eq!(included, range(13, 23));
    }

    #[test]
    fn edit_truncates_ranges_overlapping_a_deletion() {
        let mut included = range(0, 10);
        edit_range(
            &mut included,
            &InputEdit {
                start_byte: 5,
                old_end_byte: 15,
                new_end_byte: 5,
                start_position: Point::new(0, 5),
                old_end_position: Point::new(0, 15),
                new_end_position: Point::new(0, 5),
            },
        );
        assert_eq!(included, range(0, 5));
    }
}
