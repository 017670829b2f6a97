//! Vendor section candidates: one bit per vendor (bitfield) or a sorted list of
//! non-default ranges (range). Both are pure functions of the allowed set; the codec
//! keeps whichever yields the shorter token.

use crate::bits::BitBuffer;
use crate::codec::CodecError;
use crate::layout::{self, DEFAULT_CONSENT, NUM_ENTRIES, VENDOR_ID_WIDTH, VENDOR_SECTION_OFFSET};
use crate::record::{RangeEntry, VendorEncodingType};
use std::collections::BTreeSet;
use tracing::debug;

/// Encoded vendor section, starting right after the encoding-type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSection {
    encoding: VendorEncodingType,
    bits: BitBuffer,
}

impl VendorSection {
    pub fn encoding(&self) -> VendorEncodingType {
        self.encoding
    }

    pub fn bits(&self) -> &BitBuffer {
        &self.bits
    }

    pub fn bit_len(&self) -> usize {
        self.bits.bit_len()
    }

    /// Length of the whole token in bytes once this section is appended to the header.
    pub fn token_byte_len(&self) -> usize {
        token_byte_len(self.bit_len())
    }
}

fn token_byte_len(section_bits: usize) -> usize {
    (VENDOR_SECTION_OFFSET + section_bits).div_ceil(8)
}

/// Bitmap of `max_vendor_id` bits; bit `id - 1` is set iff `id` is allowed.
pub fn bitfield_section(allowed: &BTreeSet<u16>, max_vendor_id: u16) -> Result<VendorSection, CodecError> {
    let mut bits = BitBuffer::with_bit_len(max_vendor_id as usize);
    for id in in_bounds(allowed, max_vendor_id) {
        bits.write_uint(1, id as usize - 1, 1)?;
    }
    Ok(VendorSection { encoding: VendorEncodingType::Bitfield, bits })
}

/// Ids that differ from `default_consent`, collapsed into maximal runs of consecutive ids.
pub fn range_entries(allowed: &BTreeSet<u16>, max_vendor_id: u16, default_consent: bool) -> Vec<RangeEntry> {
    if default_consent {
        collapse_runs((1..=max_vendor_id).filter(|id| !allowed.contains(id)))
    } else {
        collapse_runs(in_bounds(allowed, max_vendor_id))
    }
}

/// Collapse ascending ids into closed ranges; a run of one id stays a single entry.
pub fn collapse_runs<I: IntoIterator<Item = u16>>(ids: I) -> Vec<RangeEntry> {
    let mut out: Vec<RangeEntry> = Vec::new();
    for id in ids {
        match out.last_mut() {
            Some(entry) if entry.last().checked_add(1) == Some(id) => {
                *entry = RangeEntry::range(entry.first(), id);
            }
            _ => out.push(RangeEntry::single(id)),
        }
    }
    out
}

/// Bits used by a range section holding `entries`.
pub fn range_section_bit_len(entries: &[RangeEntry]) -> usize {
    DEFAULT_CONSENT.width + NUM_ENTRIES.width + entries.iter().map(RangeEntry::bit_width).sum::<usize>()
}

/// Default-consent flag, entry count, then one entry per run. Fails with `FieldOverflow`
/// when the run count does not fit the entry-count field.
pub fn range_section(
    allowed: &BTreeSet<u16>,
    max_vendor_id: u16,
    default_consent: bool,
) -> Result<VendorSection, CodecError> {
    let entries = range_entries(allowed, max_vendor_id, default_consent);
    NUM_ENTRIES.check(entries.len() as u64)?;

    let mut bits = BitBuffer::with_bit_len(range_section_bit_len(&entries));
    bits.write_uint(default_consent as u64, DEFAULT_CONSENT.offset - VENDOR_SECTION_OFFSET, DEFAULT_CONSENT.width)?;
    bits.write_uint(entries.len() as u64, NUM_ENTRIES.offset - VENDOR_SECTION_OFFSET, NUM_ENTRIES.width)?;
    let mut pos = layout::RANGE_ENTRIES_OFFSET - VENDOR_SECTION_OFFSET;
    for entry in &entries {
        let is_range = !entry.is_single();
        bits.write_uint(is_range as u64, pos, layout::RANGE_ENTRY_TYPE_WIDTH)?;
        pos += layout::RANGE_ENTRY_TYPE_WIDTH;
        bits.write_uint(entry.first().into(), pos, VENDOR_ID_WIDTH)?;
        pos += VENDOR_ID_WIDTH;
        if is_range {
            bits.write_uint(entry.last().into(), pos, VENDOR_ID_WIDTH)?;
            pos += VENDOR_ID_WIDTH;
        }
    }
    Ok(VendorSection { encoding: VendorEncodingType::Range, bits })
}

/// Keep the candidate with the shorter padded token; ties go to the bitfield.
pub fn select_shortest(bitfield: VendorSection, range: Option<VendorSection>) -> VendorSection {
    let choice = pick(bitfield.bit_len(), range.as_ref().map(VendorSection::bit_len));
    debug!(
        bitfield_bytes = bitfield.token_byte_len(),
        range_bytes = range.as_ref().map(VendorSection::token_byte_len),
        chosen = %choice,
        "selected vendor encoding"
    );
    match (choice, range) {
        (VendorEncodingType::Range, Some(range)) => range,
        _ => bitfield,
    }
}

/// The variant [`select_shortest`] would keep, computed from lengths alone.
pub fn preferred_encoding(allowed: &BTreeSet<u16>, max_vendor_id: u16, default_consent: bool) -> VendorEncodingType {
    let entries = range_entries(allowed, max_vendor_id, default_consent);
    let range_bits = NUM_ENTRIES
        .check(entries.len() as u64)
        .ok()
        .map(|_| range_section_bit_len(&entries));
    pick(max_vendor_id as usize, range_bits)
}

fn pick(bitfield_bits: usize, range_bits: Option<usize>) -> VendorEncodingType {
    match range_bits {
        Some(bits) if token_byte_len(bits) < token_byte_len(bitfield_bits) => VendorEncodingType::Range,
        _ => VendorEncodingType::Bitfield,
    }
}

fn in_bounds(allowed: &BTreeSet<u16>, max_vendor_id: u16) -> impl Iterator<Item = u16> + '_ {
    allowed.iter().copied().filter(move |&id| id >= 1 && id <= max_vendor_id)
}
