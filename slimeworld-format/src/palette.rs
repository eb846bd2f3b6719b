//! Packed palette-index storage.
//!
//! Entries never span two words: each i64 holds `64 / bits` entries,
//! the first entry in the lowest bits.

use crate::nibble::SECTION_VOLUME;

/// Bits needed to address a palette of `len` entries (`ceil(log2(len))`).
/// A single-entry palette needs no index data at all.
pub fn bits_for(len: usize) -> u8 {
    if len <= 1 {
        0
    } else {
        (usize::BITS - (len - 1).leading_zeros()) as u8
    }
}

/// Number of i64 words needed for `count` entries at `bits` each.
pub fn word_count(count: usize, bits: u8) -> usize {
    if bits == 0 {
        return 0;
    }
    let per_word = 64 / bits as usize;
    count.div_ceil(per_word)
}

pub fn pack(indices: &[u16], bits: u8) -> Vec<i64> {
    if bits == 0 {
        return Vec::new();
    }
    let bits = bits as usize;
    let per_word = 64 / bits;
    let mask = (1u64 << bits) - 1;
    let mut words = vec![0i64; word_count(indices.len(), bits as u8)];

    for (i, &index) in indices.iter().enumerate() {
        let word = i / per_word;
        let offset = (i % per_word) * bits;
        // Work on u64 so the shift never touches the sign bit semantics.
        let current = words[word] as u64;
        words[word] = (current | ((index as u64 & mask) << offset)) as i64;
    }
    words
}

pub fn unpack(words: &[i64], bits: u8, count: usize) -> Vec<u16> {
    if bits == 0 {
        return vec![0; count];
    }
    let bits = bits as usize;
    let per_word = 64 / bits;
    let mask = (1u64 << bits) - 1;

    (0..count)
        .map(|i| {
            let word = words.get(i / per_word).copied().unwrap_or(0) as u64;
            ((word >> ((i % per_word) * bits)) & mask) as u16
        })
        .collect()
}

/// Word count for a full section at the given width.
pub fn section_word_count(bits: u8) -> usize {
    word_count(SECTION_VOLUME, bits)
}
