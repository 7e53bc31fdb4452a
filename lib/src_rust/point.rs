use std::fmt;

/// A position in a multi-line text document, in terms of rows and columns.
///
/// Rows and columns are zero-based. Columns count bytes, not characters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub row: usize,
    pub column: usize,
}

impl Point {
    pub const ZERO: Self = Self { row: 0, column: 0 };
    pub const MAX: Self = Self {
        row: usize::MAX,
        column: usize::MAX,
    };

    #[must_use]
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// Appends the relative extent `b` to the absolute point `a`.
#[inline]
pub(crate) fn point_add(a: Point, b: Point) -> Point {
    if b.row > 0 {
        Point::new(a.row + b.row, b.column)
    } else {
        Point::new(a.row, a.column + b.column)
    }
}

/// The extent from `b` to `a`, clamped at zero.
#[inline]
pub(crate) fn point_sub(a: Point, b: Point) -> Point {
    if a.row > b.row {
        Point::new(a.row - b.row, a.column)
    } else {
        Point::new(0, a.column.saturating_sub(b.column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_resets_column_on_new_rows() {
        assert_eq!(point_add(Point::new(2, 7), Point::new(0, 3)), Point::new(2, 10));
        assert_eq!(point_add(Point::new(2, 7), Point::new(1, 3)), Point::new(3, 3));
    }

    #[test]
    fn sub_clamps_at_zero() {
        assert_eq!(point_sub(Point::new(3, 4), Point::new(1, 9)), Point::new(2, 4));
        assert_eq!(point_sub(Point::new(1, 2), Point::new(1, 9)), Point::new(0, 0));
    }
}
