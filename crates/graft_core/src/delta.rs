//! Line-based binary deltas.
//!
//! A delta is a sequence of hunks, each `[start: u32 BE][end: u32 BE][len: u32 BE]`
//! followed by `len` bytes. Applying a hunk replaces `base[start..end]` with its
//! bytes. Offsets always refer to the original base, and hunks are sorted and
//! non-overlapping. There is no header or footer.
//!
//! Encoding is deterministic: the matching blocks come from a longest common
//! substring matcher over lines, then block boundaries are normalized so equal
//! inputs always produce the same bytes.

use crate::error::{GraftError, Result};
use std::collections::HashMap;

const HUNK_HEADER_LEN: usize = 12;

/// Sequences with at least this many lines get popular lines excluded from match seeding.
const AUTOJUNK_MIN_LEN: usize = 200;

/// Splits content into lines, keeping terminators.
///
/// A line ends at `\n`, `\r\n` or a lone `\r`. A trailing run without
/// terminator is the last line.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'\n' => {
                lines.push(&data[start..=i]);
                start = i + 1;
            }
            b'\r' => {
                if data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                lines.push(&data[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// A run of equal lines: `a[a_start..a_start + len] == b[b_start..b_start + len]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block {
    /// First line in the old sequence.
    pub a_start: usize,
    /// First line in the new sequence.
    pub b_start: usize,
    /// Number of lines.
    pub len: usize,
}

impl Block {
    const fn new(a_start: usize, b_start: usize, len: usize) -> Self {
        Self {
            a_start,
            b_start,
            len,
        }
    }
}

struct SequenceMatcher<'a, 'b> {
    a: &'a [&'b [u8]],
    b: &'a [&'b [u8]],
    b2j: HashMap<&'b [u8], Vec<usize>>,
}

impl<'a, 'b> SequenceMatcher<'a, 'b> {
    fn new(a: &'a [&'b [u8]], b: &'a [&'b [u8]]) -> Self {
        let mut b2j: HashMap<&'b [u8], Vec<usize>> = HashMap::new();
        for (j, line) in b.iter().enumerate() {
            b2j.entry(*line).or_default().push(j);
        }

        if b.len() >= AUTOJUNK_MIN_LEN {
            let limit = b.len() / 100 + 1;
            b2j.retain(|_, indices| indices.len() <= limit);
        }

        Self { a, b, b2j }
    }

    fn find_longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Block {
        let (a, b) = (self.a, self.b);
        let mut best = Block::new(alo, blo, 0);

        // Length of the match ending at a[i - 1], b[j] keyed by j.
        let mut j2len: HashMap<usize, usize> = HashMap::new();
        for (i, line) in a.iter().enumerate().take(ahi).skip(alo) {
            let mut next: HashMap<usize, usize> = HashMap::new();
            if let Some(indices) = self.b2j.get(line) {
                for &j in indices {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j
                        .checked_sub(1)
                        .and_then(|prev| j2len.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next.insert(j, k);
                    if k > best.len {
                        best = Block::new(i + 1 - k, j + 1 - k, k);
                    }
                }
            }
            j2len = next;
        }

        // Popular lines never seed a match but may extend one.
        while best.a_start > alo && best.b_start > blo && a[best.a_start - 1] == b[best.b_start - 1]
        {
            best = Block::new(best.a_start - 1, best.b_start - 1, best.len + 1);
        }
        while best.a_start + best.len < ahi
            && best.b_start + best.len < bhi
            && a[best.a_start + best.len] == b[best.b_start + best.len]
        {
            best.len += 1;
        }

        best
    }

    fn matching_blocks(&self) -> Vec<Block> {
        let (la, lb) = (self.a.len(), self.b.len());
        let mut queue = vec![(0, la, 0, lb)];
        let mut blocks = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let m = self.find_longest_match(alo, ahi, blo, bhi);
            if m.len == 0 {
                continue;
            }
            blocks.push(m);
            if alo < m.a_start && blo < m.b_start {
                queue.push((alo, m.a_start, blo, m.b_start));
            }
            if m.a_start + m.len < ahi && m.b_start + m.len < bhi {
                queue.push((m.a_start + m.len, ahi, m.b_start + m.len, bhi));
            }
        }
        blocks.sort();

        let mut merged = Vec::with_capacity(blocks.len() + 1);
        let mut current = Block::new(0, 0, 0);
        for block in blocks {
            if current.a_start + current.len == block.a_start
                && current.b_start + current.len == block.b_start
            {
                current.len += block.len;
            } else {
                if current.len > 0 {
                    merged.push(current);
                }
                current = block;
            }
        }
        if current.len > 0 {
            merged.push(current);
        }
        merged.push(Block::new(la, lb, 0));
        merged
    }
}

/// Computes matching blocks between two line sequences.
///
/// The result is sorted, adjacent blocks are merged, and it always ends with
/// the zero-length block `(a.len(), b.len(), 0)`.
pub fn matching_blocks(a: &[&[u8]], b: &[&[u8]]) -> Vec<Block> {
    SequenceMatcher::new(a, b).matching_blocks()
}

/// Moves block boundaries forward over lines that match on both sides.
///
/// For each pair of consecutive blocks touching on one side, the first block
/// grows (and the second shrinks) while the line after the first block is
/// the same in `a` and `b`.
pub fn normalize_blocks(a: &[&[u8]], b: &[&[u8]], blocks: &[Block]) -> Vec<Block> {
    let mut out = Vec::with_capacity(blocks.len());
    let mut iter = blocks.iter().copied();
    let Some(mut prev) = iter.next() else {
        return out;
    };

    for curr in iter {
        let a1_end = prev.a_start + prev.len;
        let b1_end = prev.b_start + prev.len;
        let a2_end = curr.a_start + curr.len;
        let b2_end = curr.b_start + curr.len;

        let same_next = |shift: usize| match (a.get(a1_end + shift), b.get(b1_end + shift)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };

        let mut shift = 0;
        if a1_end == curr.a_start {
            while a1_end + shift < a2_end && same_next(shift) {
                shift += 1;
            }
        } else if b1_end == curr.b_start {
            while b1_end + shift < b2_end && same_next(shift) {
                shift += 1;
            }
        }

        out.push(Block::new(prev.a_start, prev.b_start, prev.len + shift));
        prev = Block::new(curr.a_start + shift, curr.b_start + shift, curr.len - shift);
    }
    out.push(prev);
    out
}

fn hunk_field(value: usize) -> Result<[u8; 4]> {
    u32::try_from(value)
        .map(u32::to_be_bytes)
        .map_err(|_| GraftError::DeltaTooLarge(value))
}

fn push_hunk(out: &mut Vec<u8>, start: usize, end: usize, data: &[&[u8]]) -> Result<()> {
    let len: usize = data.iter().map(|l| l.len()).sum();
    out.extend_from_slice(&hunk_field(start)?);
    out.extend_from_slice(&hunk_field(end)?);
    out.extend_from_slice(&hunk_field(len)?);
    for line in data {
        out.extend_from_slice(line);
    }
    Ok(())
}

/// Computes the delta turning `a` into `b`.
///
/// # Errors
///
/// Returns `DeltaTooLarge` when an offset or hunk length doesn't fit in 32 bits.
///
/// # Examples
///
/// ```
/// use graft_core::delta;
///
/// let d = delta::encode(b"a\nb\n", b"a\nc\n").unwrap();
/// assert_eq!(d, [0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 2, b'c', b'\n']);
/// assert_eq!(delta::apply(b"a\nb\n", &d).unwrap(), b"a\nc\n");
/// ```
pub fn encode(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    let a_lines = split_lines(a);
    let b_lines = split_lines(b);
    let mut out = Vec::new();

    if a_lines.is_empty() {
        if !b.is_empty() {
            push_hunk(&mut out, 0, 0, &[b])?;
        }
        return Ok(out);
    }

    let mut offsets = Vec::with_capacity(a_lines.len() + 1);
    offsets.push(0);
    for line in &a_lines {
        offsets.push(offsets[offsets.len() - 1] + line.len());
    }

    let blocks = matching_blocks(&a_lines, &b_lines);
    let blocks = normalize_blocks(&a_lines, &b_lines, &blocks);

    let (mut la, mut lb) = (0, 0);
    for block in blocks {
        let inserted = &b_lines[lb..block.b_start];
        if block.a_start > la || !inserted.is_empty() {
            push_hunk(&mut out, offsets[la], offsets[block.a_start], inserted)?;
        }
        la = block.a_start + block.len;
        lb = block.b_start + block.len;
    }

    Ok(out)
}

/// One instruction of a delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hunk<'a> {
    /// Start offset in the base.
    pub start: usize,
    /// End offset in the base (exclusive).
    pub end: usize,
    /// Replacement bytes.
    pub data: &'a [u8],
}

/// Iterator over the hunks of a delta. Stops after the first error.
pub struct Hunks<'a> {
    delta: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Hunks<'a> {
    type Item = Result<Hunk<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.delta[self.pos..];
        if rest.is_empty() {
            return None;
        }
        if rest.len() < HUNK_HEADER_LEN {
            self.pos = self.delta.len();
            return Some(Err(GraftError::MalformedDelta(format!(
                "truncated hunk header at offset {}",
                self.pos
            ))));
        }

        let field = |i: usize| {
            u32::from_be_bytes([rest[i], rest[i + 1], rest[i + 2], rest[i + 3]]) as usize
        };
        let (start, end, len) = (field(0), field(4), field(8));

        let Some(data) = rest.get(HUNK_HEADER_LEN..HUNK_HEADER_LEN + len) else {
            let at = self.pos;
            self.pos = self.delta.len();
            return Some(Err(GraftError::MalformedDelta(format!(
                "hunk at offset {} announces {} bytes, {} available",
                at,
                len,
                rest.len() - HUNK_HEADER_LEN
            ))));
        };

        self.pos += HUNK_HEADER_LEN + len;
        Some(Ok(Hunk { start, end, data }))
    }
}

/// Parses a delta lazily.
pub fn hunks(delta: &[u8]) -> Hunks<'_> {
    Hunks { delta, pos: 0 }
}

/// Applies a delta to `base`.
///
/// # Errors
///
/// Returns `MalformedDelta` if a hunk is truncated, goes backwards, or
/// points past the end of `base`.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(base.len() + delta.len());
    let mut last_end = 0;

    for hunk in hunks(delta) {
        let hunk = hunk?;
        if hunk.start < last_end || hunk.end < hunk.start || hunk.end > base.len() {
            return Err(GraftError::MalformedDelta(format!(
                "hunk {}..{} does not fit after offset {} in a {}-byte base",
                hunk.start,
                hunk.end,
                last_end,
                base.len()
            )));
        }
        out.extend_from_slice(&base[last_end..hunk.start]);
        out.extend_from_slice(hunk.data);
        last_end = hunk.end;
    }

    out.extend_from_slice(&base[last_end..]);
    Ok(out)
}
