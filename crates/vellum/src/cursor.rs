use serde::{Deserialize, Serialize};
use vellum_common::NodeId;

/// An opaque, replayable caret anchor.
///
/// The engine never interprets carets beyond equality: it stores the values
/// commands carry and re-applies them on undo/redo. For a text leaf the
/// offset is a unicode codepoint index; for an element it is a child index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caret {
    pub node: NodeId,
    pub offset: usize,
    /// The target position is at the left, middle, or right of the given
    /// offset. Side info can help to model the selection.
    pub side: Side,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left = -1,
    #[default]
    Middle = 0,
    Right = 1,
}

impl Side {
    pub fn from_i32(i: i32) -> Option<Self> {
        match i {
            -1 => Some(Self::Left),
            0 => Some(Self::Middle),
            1 => Some(Self::Right),
            _ => None,
        }
    }

    pub fn to_i32(&self) -> i32 {
        *self as i32
    }
}

impl Caret {
    pub fn new(node: NodeId, offset: usize, side: Side) -> Self {
        Self { node, offset, side }
    }

    pub fn encode(&self) -> Vec<u8> {
        postcard::to_allocvec(self).unwrap()
    }

    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}

/// A selection between two carets. A collapsed range is a plain cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaretRange {
    pub start: Caret,
    pub end: Caret,
}

impl CaretRange {
    pub fn new(start: Caret, end: Caret) -> Self {
        Self { start, end }
    }

    pub fn collapsed(caret: Caret) -> Self {
        Self {
            start: caret.clone(),
            end: caret,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    pub fn encode(&self) -> Vec<u8> {
        postcard::to_allocvec(self).unwrap()
    }

    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}

/// What a command wants done with the caret at one of its boundaries.
///
/// `Unknown` means "not captured yet"; execution fills it in. `Keep` means
/// "do not touch the caret" when the boundary is replayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CaretHint {
    #[default]
    Unknown,
    Keep,
    At(CaretRange),
}

impl CaretHint {
    pub fn is_unknown(&self) -> bool {
        matches!(self, CaretHint::Unknown)
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, CaretHint::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_round_trips_through_encoding() {
        let caret = Caret::new(NodeId(3), 7, Side::Right);
        let decoded = Caret::decode(&caret.encode()).unwrap();
        assert_eq!(caret, decoded);

        let range = CaretRange::new(Caret::new(NodeId(1), 0, Side::Left), caret);
        let decoded = CaretRange::decode(&range.encode()).unwrap();
        assert_eq!(range, decoded);
    }

    #[test]
    fn collapsed_range() {
        let range = CaretRange::collapsed(Caret::new(NodeId(0), 2, Side::Middle));
        assert!(range.is_collapsed());
        assert_eq!(range.start, range.end);
    }

    #[test]
    fn side_conversion() {
        assert_eq!(Side::from_i32(-1), Some(Side::Left));
        assert_eq!(Side::from_i32(2), None);
        assert_eq!(Side::Right.to_i32(), 1);
    }
}
