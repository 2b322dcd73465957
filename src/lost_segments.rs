//! # Lost Segment Store Module
//!
//! The core abstraction provided by this module is the [LostSegmentStore]. The receiving side of
//! a transaction uses it to keep track of file data gaps which need to be requested with NAK
//! PDUs.
//!
//! [LostSegmentsList] is a vector based implementation which can grow dynamically and can
//! optionally be bounded.
use crate::pdu::nak::SegmentRequest;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum LostSegmentError {
    #[error("store is full")]
    StoreFull,
    #[error("segment is empty")]
    EmptySegment,
    #[error("segment start {0} is larger than segment end {1}")]
    StartLargerThanEnd(u64, u64),
}

/// Generic trait to model a lost segment store.
///
/// Segments are half-open ranges `[start, end)` of file offsets.
pub trait LostSegmentStore {
    type Iter<'a>: Iterator<Item = (u64, u64)> + 'a
    where
        Self: 'a;

    /// Iterate over all lost segments stored, in ascending order.
    fn iter(&self) -> Self::Iter<'_>;

    fn number_of_segments(&self) -> usize;

    fn capacity(&self) -> Option<usize>;

    fn reset(&mut self);

    /// Checks whether the segment is fully contained in one of the stored segments.
    fn segment_in_store(&self, segment: (u64, u64)) -> bool;

    /// Add a new lost segment. Overlapping or adjacent segments are merged.
    fn add_lost_segment(&mut self, lost_seg: (u64, u64)) -> Result<(), LostSegmentError>;

    /// Marks the passed range as received. Any overlap with stored segments is cut out, which
    /// might split a segment in two.
    ///
    /// Returns whether any stored segment was changed. Removing a range which was already
    /// removed is a no-op.
    fn remove_lost_segment(
        &mut self,
        segment_to_remove: (u64, u64),
    ) -> Result<bool, LostSegmentError>;

    #[inline]
    fn is_empty(&self) -> bool {
        self.number_of_segments() == 0
    }

    /// Total number of missing octets.
    fn missing_octets(&self) -> u64 {
        self.iter().map(|(start, end)| end - start).sum()
    }

    fn to_segment_requests(&self) -> Vec<SegmentRequest> {
        self.iter().collect()
    }
}

/// Implementation based on a [Vec] which is kept sorted and coalesced.
///
/// Optionally, a maximum capacity can be specified at creation time.
#[derive(Debug, Default, Clone)]
pub struct LostSegmentsList {
    list: Vec<(u64, u64)>,
    opt_capacity: Option<usize>,
}

impl LostSegmentsList {
    pub fn new(opt_capacity: Option<usize>) -> Self {
        Self {
            list: Vec::new(),
            opt_capacity,
        }
    }

    fn check_segment(segment: (u64, u64)) -> Result<(), LostSegmentError> {
        if segment.1 == segment.0 {
            return Err(LostSegmentError::EmptySegment);
        }
        if segment.0 > segment.1 {
            return Err(LostSegmentError::StartLargerThanEnd(segment.0, segment.1));
        }
        Ok(())
    }
}

impl LostSegmentStore for LostSegmentsList {
    type Iter<'a>
        = core::iter::Cloned<core::slice::Iter<'a, (u64, u64)>>
    where
        Self: 'a;

    fn iter(&self) -> Self::Iter<'_> {
        self.list.iter().cloned()
    }

    #[inline]
    fn number_of_segments(&self) -> usize {
        self.list.len()
    }

    #[inline]
    fn capacity(&self) -> Option<usize> {
        self.opt_capacity
    }

    #[inline]
    fn reset(&mut self) {
        self.list.clear();
    }

    fn segment_in_store(&self, segment: (u64, u64)) -> bool {
        self.list
            .iter()
            .any(|(seg_start, seg_end)| segment.0 >= *seg_start && segment.1 <= *seg_end)
    }

    fn add_lost_segment(&mut self, lost_seg: (u64, u64)) -> Result<(), LostSegmentError> {
        Self::check_segment(lost_seg)?;
        // First segment which ends at or after the new start can be merged with.
        let first = self.list.partition_point(|&(_, end)| end < lost_seg.0);
        let mut merged = lost_seg;
        let mut last = first;
        while last < self.list.len() && self.list[last].0 <= lost_seg.1 {
            merged.0 = merged.0.min(self.list[last].0);
            merged.1 = merged.1.max(self.list[last].1);
            last += 1;
        }
        if first == last {
            if let Some(capacity) = self.opt_capacity {
                if self.list.len() >= capacity {
                    return Err(LostSegmentError::StoreFull);
                }
            }
            self.list.insert(first, merged);
        } else {
            self.list.drain(first + 1..last);
            self.list[first] = merged;
        }
        Ok(())
    }

    fn remove_lost_segment(
        &mut self,
        segment_to_remove: (u64, u64),
    ) -> Result<bool, LostSegmentError> {
        Self::check_segment(segment_to_remove)?;
        let (rm_start, rm_end) = segment_to_remove;
        let first = self.list.partition_point(|&(_, end)| end <= rm_start);
        let mut last = first;
        while last < self.list.len() && self.list[last].0 < rm_end {
            last += 1;
        }
        if first == last {
            return Ok(false);
        }
        let mut remainders: smallvec::SmallVec<[(u64, u64); 2]> = smallvec::SmallVec::new();
        let (first_start, _) = self.list[first];
        let (_, last_end) = self.list[last - 1];
        if first_start < rm_start {
            remainders.push((first_start, rm_start));
        }
        if last_end > rm_end {
            remainders.push((rm_end, last_end));
        }
        let new_len = self.list.len() - (last - first) + remainders.len();
        if let Some(capacity) = self.opt_capacity {
            if new_len > capacity {
                return Err(LostSegmentError::StoreFull);
            }
        }
        self.list.drain(first..last);
        for (idx, remainder) in remainders.into_iter().enumerate() {
            self.list.insert(first + idx, remainder);
        }
        Ok(true)
    }
}
