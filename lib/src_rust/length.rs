use std::ops::{Add, AddAssign, Sub};

use super::point::{point_add, point_sub};
use crate::Point;

/// A span of text measured both in bytes and as a row/column extent.
///
/// Used both for absolute positions (measured from the start of the document)
/// and for relative sizes such as a subtree's padding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Length {
    pub bytes: usize,
    pub extent: Point,
}

/// Sentinel for "no token end recorded yet".
pub(crate) const LENGTH_UNDEFINED: Length = Length {
    bytes: 0,
    extent: Point { row: 0, column: 1 },
};

pub(crate) const LENGTH_MAX: Length = Length {
    bytes: usize::MAX,
    extent: Point::MAX,
};

impl Length {
    pub const ZERO: Self = Self {
        bytes: 0,
        extent: Point::ZERO,
    };

    #[inline]
    pub const fn new(bytes: usize, extent: Point) -> Self {
        Self { bytes, extent }
    }

    #[inline]
    pub fn is_undefined(self) -> bool {
        self.bytes == 0 && self.extent.column != 0
    }

    #[inline]
    pub fn min(self, other: Self) -> Self {
        if self.bytes < other.bytes {
            self
        } else {
            other
        }
    }

    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self.bytes >= other.bytes {
            self
        } else {
            other
        }
    }
}

impl Add for Length {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            bytes: self.bytes + other.bytes,
            extent: point_add(self.extent, other.extent),
        }
    }
}

impl AddAssign for Length {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Length {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self {
            bytes: self.bytes.saturating_sub(other.bytes),
            extent: point_sub(self.extent, other.extent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn len(bytes: usize, row: usize, column: usize) -> Length {
        Length::new(bytes, Point::new(row, column))
    }

    #[test]
    fn add_and_sub_are_inverse_on_extents() {
        let start = len(10, 1, 3);
        let size = len(7, 1, 2);
        let end = start + size;
        assert_eq!(end, len(17, 2, 2));
        assert_eq!(end - start, size);
    }

    #[test]
    fn undefined_is_distinct_from_zero() {
        assert!(LENGTH_UNDEFINED.is_undefined());
        assert!(!Length::ZERO.is_undefined());
    }
}
