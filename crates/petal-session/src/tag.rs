//! Correlation tags for outstanding completion-queue operations.
//!
//! The transport hands back an opaque token with every completion event.
//! One token space has to disambiguate two logical directions, so read
//! tags are allocated as strictly positive integers and write tags as
//! strictly negative ones: the sign encodes the direction, the magnitude
//! encodes the sequence order.

/// An opaque correlation token.
///
/// Matches a completion event to the operation that produced it. Only
/// ever compared for equality; the inner value is exposed for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(i64);

impl Tag {
    /// The raw token value, for diagnostics.
    pub fn raw(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which logical direction a tag sequence belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read-side operations: positive tags.
    Read,
    /// Write-side operations (including start, half-close, finish): negative tags.
    Write,
}

/// Sequential tag allocator for one direction.
///
/// A pure counter: no two tags of the same direction are equal until the
/// magnitude wraps. The magnitude stays within `i32` so the token fits
/// every transport tag representation; it resets to 1 before overflow.
/// With at most one outstanding operation per direction, a wrapped tag
/// can never collide with one still in flight.
#[derive(Debug)]
pub struct TagAllocator {
    count: i32,
    direction: Direction,
}

impl TagAllocator {
    /// Create an allocator for the given direction, starting at magnitude 1.
    pub fn new(direction: Direction) -> Self {
        Self {
            count: 1,
            direction,
        }
    }

    /// The most recently issued tag.
    ///
    /// This is the tag the next completion event for this direction is
    /// expected to carry.
    pub fn current(&self) -> Tag {
        match self.direction {
            Direction::Read => Tag(i64::from(self.count)),
            Direction::Write => Tag(-i64::from(self.count)),
        }
    }

    /// Move to the next magnitude, wrapping to 1 before overflow.
    pub fn advance(&mut self) {
        self.count += 1;
        if self.count >= i32::MAX {
            self.count = 1;
        }
    }

    /// Advance and return the freshly issued tag.
    pub fn next(&mut self) -> Tag {
        self.advance();
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_tags_are_positive_and_strictly_increasing() {
        let mut tags = TagAllocator::new(Direction::Read);
        let mut prev = tags.current().raw();
        assert!(prev > 0);
        for _ in 0..100 {
            let next = tags.next().raw();
            assert!(next > 0);
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn write_tags_are_negative_with_increasing_magnitude() {
        let mut tags = TagAllocator::new(Direction::Write);
        let mut prev = tags.current().raw();
        assert!(prev < 0);
        for _ in 0..100 {
            let next = tags.next().raw();
            assert!(next < 0);
            assert!(next.abs() > prev.abs());
            prev = next;
        }
    }

    #[test]
    fn directions_never_collide() {
        let mut reads = TagAllocator::new(Direction::Read);
        let mut writes = TagAllocator::new(Direction::Write);
        for _ in 0..100 {
            assert_ne!(reads.next(), writes.next());
        }
    }

    #[test]
    fn wraps_to_one_before_overflow() {
        let mut tags = TagAllocator::new(Direction::Read);
        tags.count = i32::MAX - 1;
        assert_eq!(tags.next().raw(), 1);
        assert_eq!(tags.next().raw(), 2);
    }
}
