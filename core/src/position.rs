//! Define types of positions and position spans.
//!
//! The positions defined in this module are represented by the id of the
//! corresponding source and raw byte indices. They are prefixed with Raw to
//! differentiate them from codespan's types and indicate that they do not
//! store human friendly data like lines and columns.
use std::{
    cmp::{max, min},
    ops::Range,
};

use codespan::ByteIndex;

use crate::files::FileId;

/// A position identified by a byte offset in a file.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RawPos {
    pub src_id: FileId,
    pub index: ByteIndex,
}

impl RawPos {
    pub fn new(src_id: FileId, index: ByteIndex) -> Self {
        Self { src_id, index }
    }
}

/// A position span identified by a starting byte offset and an ending byte
/// offset in a file.
///
/// `end` is the offset of the last character plus one.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RawSpan {
    pub src_id: FileId,
    pub start: ByteIndex,
    pub end: ByteIndex,
}

impl RawSpan {
    /// Fuse two spans if they are from the same source file. The resulting
    /// span is the smallest span that contains both `self` and `other`.
    pub fn fuse(self, other: RawSpan) -> Option<RawSpan> {
        if self.src_id == other.src_id {
            Some(RawSpan {
                src_id: self.src_id,
                start: min(self.start, other.start),
                end: max(self.end, other.end),
            })
        } else {
            None
        }
    }

    /// Create a span from a numeric range. If either start or end is too
    /// large to be represented, `u32::MAX` is used instead.
    pub fn from_range(src_id: FileId, range: Range<usize>) -> Self {
        RawSpan {
            src_id,
            start: ByteIndex(u32::try_from(range.start).unwrap_or(u32::MAX)),
            end: ByteIndex(u32::try_from(range.end).unwrap_or(u32::MAX)),
        }
    }

    /// Convert this span to a numeric index range.
    pub fn to_range(self) -> Range<usize> {
        (self.start.0 as usize)..(self.end.0 as usize)
    }

    /// Return the start of this span.
    pub fn start_pos(&self) -> RawPos {
        RawPos {
            src_id: self.src_id,
            index: self.start,
        }
    }

    /// Check whether this span contains a position.
    pub fn contains(&self, pos: RawPos) -> bool {
        self.src_id == pos.src_id && (self.start..self.end).contains(&pos.index)
    }
}

/// The position span of a term, pattern or type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum TermPos {
    /// The node exactly corresponds to an original span in the source.
    Original(RawSpan),
    /// The node was produced by elaboration (desugared literal patterns,
    /// synthetic exits, generated guards) from an original span in the
    /// source.
    Inherited(RawSpan),
    /// The node couldn't be assigned a position (usually generated during
    /// elaboration with no precise source counterpart).
    #[default]
    None,
}

impl TermPos {
    /// Apply a transformation to the inner span, if any.
    pub fn map<F: FnOnce(RawSpan) -> RawSpan>(self, f: F) -> Self {
        match self {
            TermPos::Original(x) => TermPos::Original(f(x)),
            TermPos::Inherited(x) => TermPos::Inherited(f(x)),
            TermPos::None => TermPos::None,
        }
    }

    pub fn as_opt_ref(&self) -> Option<&RawSpan> {
        match self {
            TermPos::Original(pos) | TermPos::Inherited(pos) => Some(pos),
            TermPos::None => None,
        }
    }

    pub fn into_opt(self) -> Option<RawSpan> {
        match self {
            TermPos::Original(pos) | TermPos::Inherited(pos) => Some(pos),
            TermPos::None => None,
        }
    }

    pub fn src_id(&self) -> Option<FileId> {
        self.as_opt_ref().map(|span| span.src_id)
    }

    /// Determine if the position is defined.
    pub fn is_def(&self) -> bool {
        !matches!(self, TermPos::None)
    }

    /// Turn this position into an inherited one, keeping the same span. Used
    /// when a node produced by elaboration borrows the span of the source
    /// construct it was derived from.
    pub fn into_inherited(self) -> Self {
        match self {
            TermPos::Original(span) => TermPos::Inherited(span),
            pos => pos,
        }
    }

    /// Fuse two positions if they are from the same source file, returning
    /// `self` unchanged otherwise.
    pub fn fuse(self, other: Self) -> Self {
        match (self, other) {
            (TermPos::Original(sp1), TermPos::Original(sp2)) => match sp1.fuse(sp2) {
                Some(span) => TermPos::Original(span),
                None => self,
            },
            (pos, TermPos::None) => pos,
            (TermPos::None, pos) => pos,
            (TermPos::Inherited(sp1), pos) | (pos, TermPos::Inherited(sp1)) => {
                match pos.into_opt().and_then(|sp2| sp1.fuse(sp2)) {
                    Some(span) => TermPos::Inherited(span),
                    None => TermPos::Inherited(sp1),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::Files;

    #[test]
    fn fuse_spans() {
        let mut files = Files::new();
        let id = files.add("a.tern", "0123456789");
        let sp1 = RawSpan::from_range(id, 0..4);
        let sp2 = RawSpan::from_range(id, 2..8);
        let fused = sp1.fuse(sp2).unwrap();
        assert_eq!(fused.to_range(), 0..8);
    }

    #[test]
    fn positions_fuse_preserving_originality() {
        let mut files = Files::new();
        let id = files.add("a.tern", "0123456789");
        let p1 = TermPos::Original(RawSpan::from_range(id, 0..2));
        let p2 = TermPos::Original(RawSpan::from_range(id, 5..9));
        assert_eq!(
            p1.fuse(p2),
            TermPos::Original(RawSpan::from_range(id, 0..9))
        );
        assert_eq!(p1.fuse(TermPos::None), p1);
    }
}
