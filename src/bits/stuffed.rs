use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::low_mask;
use crate::Result;

/// Default capacity of a single segment, in bits (16 MiB).
pub const DEFAULT_MAX_BITS: u64 = 16 * 1024 * 1024 * 8;

/// Segments start this small and double until they reach `max_bits`.
const INITIAL_WORDS: usize = 16;

/// One contiguous run of words in the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Segment {
    /// Logical bit offset of the first bit of this segment
    bgn: u64,
    /// Number of valid bits
    len: u64,
    words: Vec<u64>,
}
impl Segment {
    fn new(bgn: u64) -> Self {
        Self {
            bgn,
            len: 0,
            words: Vec::new(),
        }
    }

    fn capacity(&self) -> u64 {
        self.words.len() as u64 * 64
    }

    /// Reads a word, treating anything past the allocation as zero.
    #[inline]
    fn word(&self, idx: u64) -> u64 {
        self.words.get(idx as usize).copied().unwrap_or(0)
    }
}

/// A positioned bit stream over a list of growable segments.
///
/// Bits are packed most-significant first within each 64-bit word. A value
/// is never split across two segments: a write that would pass the segment
/// capacity starts a new segment, and a read that would pass the valid
/// length of the current segment moves to the next one.
#[derive(Debug, Clone)]
pub struct StuffedBits {
    max_bits: u64,
    segments: Vec<Segment>,

    /// Index of the segment holding the cursor
    blk: usize,

    /// Cursor position within the current segment
    pos: u64,
}
impl Default for StuffedBits {
    fn default() -> Self {
        Self::new()
    }
}
impl StuffedBits {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_bits(DEFAULT_MAX_BITS)
    }

    /// Creates an empty stream whose segments hold at most `max_bits` bits.
    ///
    /// `max_bits` is rounded up to a whole number of words.
    #[must_use]
    pub fn with_max_bits(max_bits: u64) -> Self {
        let max_bits = max_bits.max(64).div_ceil(64) * 64;
        Self {
            max_bits,
            segments: vec![Segment::new(0)],
            blk: 0,
            pos: 0,
        }
    }

    /// The capacity of a single segment, in bits
    #[must_use]
    pub fn max_bits(&self) -> u64 {
        self.max_bits
    }

    /// Total number of valid bits in the stream
    #[must_use]
    pub fn length(&self) -> u64 {
        self.segments.last().map_or(0, |seg| seg.bgn + seg.len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|seg| seg.len == 0)
    }

    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// The logical bit position of the cursor
    #[must_use]
    pub fn position(&self) -> u64 {
        self.segments[self.blk].bgn + self.pos
    }

    /// Moves the cursor to a logical bit position.
    ///
    /// Positions past the end of the data are clamped to the end.
    pub fn set_position(&mut self, position: u64) {
        for (idx, seg) in self.segments.iter().enumerate() {
            if position < seg.bgn + seg.len {
                self.blk = idx;
                self.pos = position.saturating_sub(seg.bgn);
                return;
            }
        }
        self.blk = self.segments.len() - 1;
        self.pos = self.segments[self.blk].len;
    }

    /// Drops all data and resets the cursor.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.segments.push(Segment::new(0));
        self.blk = 0;
        self.pos = 0;
    }

    /// Makes room for `width` bits at the cursor, starting a new segment if
    /// the current one would pass `max_bits`.
    pub(crate) fn reserve(&mut self, width: u64) {
        if self.pos > 0 && self.pos + width > self.max_bits {
            let cur = &self.segments[self.blk];
            let bgn = cur.bgn + cur.len;
            self.blk += 1;
            if self.blk == self.segments.len() {
                self.segments.push(Segment::new(bgn));
            }
            self.pos = 0;
        }

        let need = self.pos + width;
        let max_words = (self.max_bits / 64) as usize;
        let seg = &mut self.segments[self.blk];
        if need > seg.capacity() {
            let mut words = seg.words.len().max(INITIAL_WORDS);
            while (words as u64) * 64 < need && words < max_words {
                words *= 2;
            }
            // a single value wider than max_bits still gets a home
            let words = words.min(max_words).max(need.div_ceil(64) as usize);
            seg.words.resize(words, 0);
        }
    }

    /// Moves to the next segment if `width` bits are not available here.
    pub(crate) fn advance_for_read(&mut self, width: u64) {
        if self.pos + width > self.segments[self.blk].len && self.blk + 1 < self.segments.len() {
            self.blk += 1;
            self.pos = 0;
        }
    }

    /// Writes without reserving; the caller guarantees capacity.
    pub(crate) fn put_binary(&mut self, width: u64, value: u64) {
        if width == 0 {
            return;
        }
        let value = value & low_mask(width);
        let seg = &mut self.segments[self.blk];
        let w = (self.pos / 64) as usize;
        let o = self.pos % 64;

        if o + width <= 64 {
            let shift = 64 - o - width;
            let mask = low_mask(width) << shift;
            seg.words[w] = (seg.words[w] & !mask) | (value << shift);
        } else {
            let hi_bits = 64 - o;
            let lo_bits = width - hi_bits;
            seg.words[w] = (seg.words[w] & !low_mask(hi_bits)) | (value >> lo_bits);
            let lo_shift = 64 - lo_bits;
            seg.words[w + 1] =
                (seg.words[w + 1] & !(low_mask(lo_bits) << lo_shift)) | (value << lo_shift);
        }

        self.pos += width;
        seg.len = seg.len.max(self.pos);
    }

    /// Reads without checking for a segment change.
    pub(crate) fn take_binary(&mut self, width: u64) -> u64 {
        if width == 0 {
            return 0;
        }
        let seg = &self.segments[self.blk];
        let w = self.pos / 64;
        let o = self.pos % 64;

        let value = if o + width <= 64 {
            (seg.word(w) << o) >> (64 - width)
        } else {
            let hi_bits = 64 - o;
            let lo_bits = width - hi_bits;
            let hi = seg.word(w) & low_mask(hi_bits);
            let lo = seg.word(w + 1) >> (64 - lo_bits);
            (hi << lo_bits) | lo
        };

        self.pos += width;
        value
    }

    /// Reads a `width`-bit (0..=64) unsigned integer at the cursor.
    pub fn get_binary(&mut self, width: u64) -> u64 {
        debug_assert!(width <= 64);
        if width == 0 {
            return 0;
        }
        self.advance_for_read(width);
        self.take_binary(width)
    }

    /// Writes the low `width` (0..=64) bits of `value` at the cursor.
    ///
    /// Returns the number of bits written.
    pub fn set_binary(&mut self, width: u64, value: u64) -> u64 {
        debug_assert!(width <= 64);
        if width == 0 {
            return 0;
        }
        self.reserve(width);
        self.put_binary(width, value);
        width
    }

    /// Reads a value up to 128 bits wide, high part first.
    pub fn get_binary128(&mut self, width: u64) -> u128 {
        if width > 64 {
            let hi = u128::from(self.get_binary(width - 64));
            let lo = u128::from(self.get_binary(64));
            (hi << 64) | lo
        } else {
            u128::from(self.get_binary(width))
        }
    }

    /// Writes a value up to 128 bits wide, high part first.
    pub fn set_binary128(&mut self, width: u64, value: u128) -> u64 {
        if width > 64 {
            self.set_binary(width - 64, (value >> 64) as u64) + self.set_binary(64, value as u64)
        } else {
            self.set_binary(width, value as u64)
        }
    }

    pub fn get_bit(&mut self) -> bool {
        self.get_binary(1) == 1
    }

    pub fn set_bit(&mut self, bit: bool) -> u64 {
        self.set_binary(1, u64::from(bit))
    }

    /// Reads a unary code: the number of zero bits before the next one bit.
    pub fn get_unary(&mut self) -> u64 {
        self.advance_for_read(1);
        let seg = &self.segments[self.blk];
        let mut value = 0;
        let mut pos = self.pos;

        while pos < seg.len {
            let o = pos % 64;
            let word = seg.word(pos / 64) << o;
            if word == 0 {
                value += 64 - o;
                pos += 64 - o;
                continue;
            }
            let zeros = u64::from(word.leading_zeros());
            value += zeros;
            pos += zeros + 1;
            break;
        }

        self.pos = pos.min(seg.len);
        value
    }

    /// Writes `value` zero bits followed by a single one bit.
    pub fn set_unary(&mut self, value: u64) -> u64 {
        self.reserve(value + 1);
        self.put_unary(value);
        value + 1
    }

    pub(crate) fn put_unary(&mut self, value: u64) {
        let mut remaining = value;
        while remaining > 0 {
            let n = remaining.min(64);
            self.put_binary(n, 0);
            remaining -= n;
        }
        self.put_binary(1, 1);
    }

    pub fn get_binary_array(&mut self, width: u64, count: usize) -> Vec<u64> {
        (0..count).map(|_| self.get_binary(width)).collect()
    }

    pub fn set_binary_array(&mut self, width: u64, values: &[u64]) -> u64 {
        values.iter().map(|&v| self.set_binary(width, v)).sum()
    }

    pub fn get_unary_array(&mut self, count: usize) -> Vec<u64> {
        (0..count).map(|_| self.get_unary()).collect()
    }

    pub fn set_unary_array(&mut self, values: &[u64]) -> u64 {
        values.iter().map(|&v| self.set_unary(v)).sum()
    }

    /// Serializes the stream.
    ///
    /// The layout is `max_bits` (u64), the segment count twice (u32), every
    /// segment's begin then every segment's length (u64 each), and finally
    /// the valid words of each segment.
    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<()> {
        let n = self.segments.len() as u32;
        writer.write_u64::<LittleEndian>(self.max_bits)?;
        writer.write_u32::<LittleEndian>(n)?;
        writer.write_u32::<LittleEndian>(n)?;
        for seg in &self.segments {
            writer.write_u64::<LittleEndian>(seg.bgn)?;
        }
        for seg in &self.segments {
            writer.write_u64::<LittleEndian>(seg.len)?;
        }
        for seg in &self.segments {
            let used = seg.len.div_ceil(64) as usize;
            for idx in 0..used {
                writer.write_u64::<LittleEndian>(seg.words.get(idx).copied().unwrap_or(0))?;
            }
        }
        Ok(())
    }

    /// Deserializes a stream written by [`dump`](Self::dump).
    ///
    /// Returns `Ok(None)` if the reader is already at end of input; this is
    /// how a concatenation of dumps signals that no more follow.
    pub fn load<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let max_bits = match reader.read_u64::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bits = Self::with_max_bits(max_bits);
        bits.load_segments(reader)?;
        Ok(Some(bits))
    }

    /// Replaces the contents of this stream with a dump read from `reader`.
    ///
    /// Returns `false` if the reader was already at end of input, in which
    /// case the stream is left empty.
    pub fn load_into<R: Read>(&mut self, reader: &mut R) -> Result<bool> {
        self.clear();
        match Self::load(reader)? {
            Some(bits) => {
                *self = bits;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load_segments<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let n = reader.read_u32::<LittleEndian>()? as usize;
        let _blocks_max = reader.read_u32::<LittleEndian>()?;

        let mut segments: Vec<Segment> = (0..n).map(|_| Segment::new(0)).collect();
        for seg in &mut segments {
            seg.bgn = reader.read_u64::<LittleEndian>()?;
        }
        for seg in &mut segments {
            seg.len = reader.read_u64::<LittleEndian>()?;
        }
        for seg in &mut segments {
            let used = seg.len.div_ceil(64) as usize;
            seg.words = vec![0; used];
            reader.read_u64_into::<LittleEndian>(&mut seg.words)?;
        }

        if segments.is_empty() {
            segments.push(Segment::new(0));
        }
        self.segments = segments;
        self.blk = 0;
        self.pos = 0;
        Ok(())
    }

    /// Serializes the stream into a byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.dump(&mut buffer)?;
        Ok(buffer)
    }

    /// Deserializes a stream from a byte buffer; an empty buffer gives an
    /// empty stream.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(bytes);
        Ok(Self::load(&mut cursor)?.unwrap_or_default())
    }
}
