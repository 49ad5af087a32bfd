//! # Slot Segments
//!
//! A pool's storage is a short, append-only list of segments. Each segment
//! is one contiguous run of 64-bit words sliced into equal slots, plus one
//! state word per slot. Growing a pool appends a segment; existing slots
//! never move, so outstanding handles stay valid.
//!
//! ```text
//!   segment 0 (initial)       segment 1 (grow)    segment 2 (grow)
//!   [slot 0][slot 1]...[n-1]  [n]...[n+k-1]       [n+k]...
//! ```
//!
//! Slot memory is made of `AtomicU64` words so that the intrusive free-list
//! link (stored in word 0 of every free slot) can be read by a racing
//! lock-free pop without undefined behavior.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;

use super::free_list::NIL;
use super::handle::{encode_state, state_generation, STATE_RETIRED};
use crate::error::{PoolError, PoolResult};

/// Bytes per storage word.
pub(crate) const WORD_BYTES: usize = 8;

/// Most segments a pool can own (initial segment included).
pub(crate) const MAX_SEGMENTS: usize = 32;

/// Number of words needed for `slot_size` bytes. Always at least one,
/// because a free slot stores its free-list link in word 0.
#[inline]
pub(crate) const fn words_for(slot_size: usize) -> usize {
    let words = slot_size.div_ceil(WORD_BYTES);
    if words == 0 {
        1
    } else {
        words
    }
}

/// Allocates `count` zeroed words, reporting heap failure instead of aborting.
pub(crate) fn try_alloc_words(count: usize) -> PoolResult<Box<[AtomicU64]>> {
    let mut words = Vec::new();
    words
        .try_reserve_exact(count)
        .map_err(|_| PoolError::AllocationFailed {
            bytes: count.saturating_mul(WORD_BYTES),
        })?;
    words.extend((0..count).map(|_| AtomicU64::new(0)));
    Ok(words.into_boxed_slice())
}

/// Copies `out.len()` bytes starting at byte `offset` out of `words`.
///
/// The caller has already bounds-checked `offset + out.len()`.
pub(crate) fn read_bytes(words: &[AtomicU64], offset: usize, out: &mut [u8]) {
    let mut pos = offset;
    let mut done = 0;
    while done < out.len() {
        let word = words[pos / WORD_BYTES].load(Ordering::Acquire).to_le_bytes();
        let start = pos % WORD_BYTES;
        let take = (WORD_BYTES - start).min(out.len() - done);
        out[done..done + take].copy_from_slice(&word[start..start + take]);
        done += take;
        pos += take;
    }
}

/// Copies `bytes` into `words` starting at byte `offset`.
///
/// Partial words are read-modify-written; only the slot owner writes.
pub(crate) fn write_bytes(words: &[AtomicU64], offset: usize, bytes: &[u8]) {
    let mut pos = offset;
    let mut done = 0;
    while done < bytes.len() {
        let cell = &words[pos / WORD_BYTES];
        let start = pos % WORD_BYTES;
        let take = (WORD_BYTES - start).min(bytes.len() - done);
        let mut word = if take == WORD_BYTES {
            [0u8; WORD_BYTES]
        } else {
            cell.load(Ordering::Acquire).to_le_bytes()
        };
        word[start..start + take].copy_from_slice(&bytes[done..done + take]);
        cell.store(u64::from_le_bytes(word), Ordering::Release);
        done += take;
        pos += take;
    }
}

/// Sets every byte of `words` to `byte`.
pub(crate) fn fill_words(words: &[AtomicU64], byte: u8) {
    let pattern = u64::from_le_bytes([byte; WORD_BYTES]);
    for word in words {
        word.store(pattern, Ordering::Release);
    }
}

/// One contiguous run of slots.
#[derive(Debug)]
pub(crate) struct Segment {
    /// Global index of the first slot.
    first: u32,
    /// Number of slots.
    len: u32,
    /// Words per slot.
    words_per_slot: usize,
    /// Slot storage, `len * words_per_slot` words.
    data: Box<[AtomicU64]>,
    /// One state word per slot.
    states: Box<[AtomicU32]>,
}

impl Segment {
    /// Allocates a segment of `len` free slots starting at global index `first`.
    ///
    /// Every slot starts at `generation`, so its first acquire issues
    /// `generation + 1`. The slots are already threaded into a chain
    /// `first -> ... -> last -> NIL`, ready to be spliced onto a free list.
    pub(crate) fn new(
        first: u32,
        len: u32,
        words_per_slot: usize,
        generation: u32,
    ) -> PoolResult<Self> {
        debug_assert!(len > 0, "segments are never empty");
        let slots = len as usize;
        let data = try_alloc_words(slots.saturating_mul(words_per_slot))?;

        let mut states = Vec::new();
        states
            .try_reserve_exact(slots)
            .map_err(|_| PoolError::AllocationFailed {
                bytes: slots.saturating_mul(std::mem::size_of::<AtomicU32>()),
            })?;
        states.extend((0..slots).map(|_| AtomicU32::new(encode_state(generation, false))));

        let segment = Self {
            first,
            len,
            words_per_slot,
            data,
            states: states.into_boxed_slice(),
        };
        segment.thread_chain();
        Ok(segment)
    }

    /// Links every slot to its successor; the last slot links to `NIL`.
    pub(crate) fn thread_chain(&self) {
        for local in 0..self.len {
            let next = if local + 1 == self.len {
                NIL
            } else {
                self.first + local + 1
            };
            self.data[local as usize * self.words_per_slot].store(u64::from(next), Ordering::Release);
        }
    }

    /// Global index of the first slot.
    #[inline]
    pub(crate) const fn first(&self) -> u32 {
        self.first
    }

    /// Global index of the last slot.
    #[inline]
    pub(crate) const fn last(&self) -> u32 {
        self.first + self.len - 1
    }

    /// Number of slots.
    #[inline]
    pub(crate) const fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub(crate) const fn contains(&self, index: u32) -> bool {
        index >= self.first && index - self.first < self.len
    }

    /// Storage words of slot `index`. The index must be in this segment.
    #[inline]
    pub(crate) fn words(&self, index: u32) -> &[AtomicU64] {
        let start = (index - self.first) as usize * self.words_per_slot;
        &self.data[start..start + self.words_per_slot]
    }

    /// Free-list link of slot `index` (word 0 of its storage).
    #[inline]
    pub(crate) fn link(&self, index: u32) -> &AtomicU64 {
        &self.data[(index - self.first) as usize * self.words_per_slot]
    }

    /// State word of slot `index`.
    #[inline]
    pub(crate) fn state(&self, index: u32) -> &AtomicU32 {
        &self.states[(index - self.first) as usize]
    }

    /// Highest generation any slot of this segment has reached.
    pub(crate) fn max_generation(&self) -> u32 {
        self.states
            .iter()
            .map(|state| state_generation(state.load(Ordering::Acquire)))
            .max()
            .unwrap_or(0)
    }

    /// Moves every slot to the terminal retired state.
    pub(crate) fn retire_all(&self) {
        for state in self.states.iter() {
            state.store(STATE_RETIRED, Ordering::Release);
        }
    }
}

/// Fixed-size table of append-only segments.
///
/// Readers walk the table without locking; appends happen under the owning
/// pool's growth lock.
#[derive(Debug)]
pub(crate) struct SegmentTable {
    segments: Box<[OnceLock<Segment>]>,
}

impl SegmentTable {
    /// Creates a table holding only `initial`.
    pub(crate) fn new(initial: Segment) -> Self {
        let segments = std::iter::once(OnceLock::from(initial))
            .chain((1..MAX_SEGMENTS).map(|_| OnceLock::new()))
            .collect();
        Self { segments }
    }

    /// Segments in index order.
    #[inline]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().map_while(OnceLock::get)
    }

    /// The segment holding global slot `index`.
    #[inline]
    pub(crate) fn find(&self, index: u32) -> Option<&Segment> {
        self.iter().find(|segment| segment.contains(index))
    }

    /// Free-list link of slot `index`.
    #[inline]
    pub(crate) fn link(&self, index: u32) -> Option<&AtomicU64> {
        self.find(index).map(|segment| segment.link(index))
    }

    /// Number of segments in use.
    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }

    /// Appends a segment. Must be called with the growth lock held.
    ///
    /// Returns `None` (dropping the segment) if the table is full.
    pub(crate) fn push(&self, segment: Segment) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|slot| slot.get().is_none())
            .map(move |slot| slot.get_or_init(|| segment))
    }

    /// Drops every segment after the first `keep`, returning the retired slot count.
    pub(crate) fn truncate(&mut self, keep: usize) -> usize {
        self.segments
            .iter_mut()
            .skip(keep)
            .filter_map(OnceLock::take)
            .map(|segment| segment.len() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_for_rounds_up() {
        assert_eq!(words_for(1), 1);
        assert_eq!(words_for(8), 1);
        assert_eq!(words_for(9), 2);
        assert_eq!(words_for(64), 8);
    }

    #[test]
    fn test_new_segment_is_chained() {
        let segment = Segment::new(10, 3, 1, 0).unwrap();
        assert_eq!(segment.link(10).load(Ordering::Relaxed), 11);
        assert_eq!(segment.link(11).load(Ordering::Relaxed), 12);
        assert_eq!(segment.link(12).load(Ordering::Relaxed), u64::from(NIL));
        assert_eq!(segment.last(), 12);
    }

    #[test]
    fn test_new_segment_seeds_generation() {
        let segment = Segment::new(0, 2, 1, 7).unwrap();
        assert_eq!(segment.state(1).load(Ordering::Relaxed), encode_state(7, false));
        assert_eq!(segment.max_generation(), 7);
    }

    #[test]
    fn test_byte_copy_across_word_boundary() {
        let words = try_alloc_words(2).unwrap();
        write_bytes(&words, 5, &[1, 2, 3, 4, 5, 6]);

        let mut out = [0u8; 6];
        read_bytes(&words, 5, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);

        // Neighboring bytes untouched
        let mut head = [0xFFu8; 5];
        read_bytes(&words, 0, &mut head);
        assert_eq!(head, [0; 5]);
    }

    #[test]
    fn test_fill_words() {
        let words = try_alloc_words(2).unwrap();
        fill_words(&words, 0xAB);
        let mut out = [0u8; 16];
        read_bytes(&words, 0, &mut out);
        assert!(out.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_table_push_find_truncate() {
        let mut table = SegmentTable::new(Segment::new(0, 4, 1, 0).unwrap());
        assert!(table.push(Segment::new(4, 2, 1, 0).unwrap()).is_some());
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(5).map(Segment::first), Some(4));
        assert!(table.find(6).is_none());

        assert_eq!(table.truncate(1), 2);
        assert_eq!(table.len(), 1);
        assert!(table.find(5).is_none());
    }

    #[test]
    fn test_table_rejects_overflow() {
        let table = SegmentTable::new(Segment::new(0, 1, 1, 0).unwrap());
        for i in 1..MAX_SEGMENTS {
            let index = u32::try_from(i).unwrap();
            assert!(table.push(Segment::new(index, 1, 1, 0).unwrap()).is_some());
        }
        let extra = u32::try_from(MAX_SEGMENTS).unwrap();
        assert!(table.push(Segment::new(extra, 1, 1, 0).unwrap()).is_none());
    }
}
