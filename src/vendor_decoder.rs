//! Read-only view of a decoded vendor section.
//!
//! Tokens may be truncated or carry sections this codec only partly understands, so
//! nothing here fails. A bitmap cut short answers "not allowed" past its end; a range
//! list cut short keeps the entries read in full and answers the default for the rest.

use crate::bits::BitBuffer;
use crate::layout::{self, DEFAULT_CONSENT, NUM_ENTRIES, RANGE_ENTRIES_OFFSET, VENDOR_ID_WIDTH, VENDOR_SECTION_OFFSET};
use crate::record::{RangeEntry, VendorEncodingType};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorDecoder {
    /// Bitmap bits actually present in the token, at most `max_vendor_id` of them.
    Bitfield { max_vendor_id: u16, bits: BitBuffer },
    Range {
        max_vendor_id: u16,
        default_consent: bool,
        /// Entry count as written in the token.
        declared_entries: usize,
        /// Entries that could be read in full.
        entries: Vec<RangeEntry>,
        truncated: bool,
    },
}

impl VendorDecoder {
    /// Interpret the vendor section of `buf` according to its encoding-type tag.
    pub fn read(buf: &BitBuffer, encoding: VendorEncodingType, max_vendor_id: u16) -> Self {
        match encoding {
            VendorEncodingType::Bitfield => VendorDecoder::Bitfield {
                max_vendor_id,
                bits: buf.slice_available(VENDOR_SECTION_OFFSET, max_vendor_id as usize),
            },
            VendorEncodingType::Range => read_ranges(buf, max_vendor_id),
        }
    }

    pub fn encoding(&self) -> VendorEncodingType {
        match self {
            VendorDecoder::Bitfield { .. } => VendorEncodingType::Bitfield,
            VendorDecoder::Range { .. } => VendorEncodingType::Range,
        }
    }

    pub fn max_vendor_id(&self) -> u16 {
        match self {
            VendorDecoder::Bitfield { max_vendor_id, .. } | VendorDecoder::Range { max_vendor_id, .. } => {
                *max_vendor_id
            }
        }
    }

    pub fn default_consent(&self) -> bool {
        match self {
            VendorDecoder::Bitfield { .. } => false,
            VendorDecoder::Range { default_consent, .. } => *default_consent,
        }
    }

    pub fn range_entries(&self) -> &[RangeEntry] {
        match self {
            VendorDecoder::Bitfield { .. } => &[],
            VendorDecoder::Range { entries, .. } => entries,
        }
    }

    /// Entry count written in the token; `None` for bitfield sections.
    pub fn declared_entries(&self) -> Option<usize> {
        match self {
            VendorDecoder::Bitfield { .. } => None,
            VendorDecoder::Range { declared_entries, .. } => Some(*declared_entries),
        }
    }

    pub fn is_truncated(&self) -> bool {
        match self {
            VendorDecoder::Bitfield { max_vendor_id, bits } => bits.bit_len() < *max_vendor_id as usize,
            VendorDecoder::Range { truncated, .. } => *truncated,
        }
    }

    pub fn is_allowed(&self, vendor_id: u16) -> bool {
        if vendor_id == 0 || vendor_id > self.max_vendor_id() {
            return false;
        }
        match self {
            VendorDecoder::Bitfield { bits, .. } => bits.read_bit(vendor_id as usize - 1).unwrap_or(false),
            VendorDecoder::Range { default_consent, entries, .. } => {
                if entries.iter().any(|entry| entry.contains(vendor_id)) {
                    !default_consent
                } else {
                    *default_consent
                }
            }
        }
    }

    /// Every allowed id in `1..=max_vendor_id`.
    pub fn allowed_ids(&self) -> BTreeSet<u16> {
        let max_vendor_id = self.max_vendor_id();
        match self {
            VendorDecoder::Bitfield { .. } => (1..=max_vendor_id).filter(|&id| self.is_allowed(id)).collect(),
            VendorDecoder::Range { default_consent: false, entries, .. } => covered_ids(entries, max_vendor_id),
            VendorDecoder::Range { entries, .. } => {
                let covered = covered_ids(entries, max_vendor_id);
                (1..=max_vendor_id).filter(|id| !covered.contains(id)).collect()
            }
        }
    }
}

fn read_ranges(buf: &BitBuffer, max_vendor_id: u16) -> VendorDecoder {
    let prefix = (
        buf.read_bit(DEFAULT_CONSENT.offset),
        buf.read_uint(NUM_ENTRIES.offset, NUM_ENTRIES.width),
    );
    let (default_consent, declared_entries) = match prefix {
        (Ok(default_consent), Ok(count)) => (default_consent, count as usize),
        _ => {
            debug!(bit_len = buf.bit_len(), "range section header truncated");
            return VendorDecoder::Range {
                max_vendor_id,
                default_consent: false,
                declared_entries: 0,
                entries: Vec::new(),
                truncated: true,
            };
        }
    };

    let mut entries = Vec::with_capacity(declared_entries);
    let mut pos = RANGE_ENTRIES_OFFSET;
    let mut truncated = false;
    for _ in 0..declared_entries {
        match read_entry(buf, pos) {
            Some((entry, width)) => {
                entries.push(entry);
                pos += width;
            }
            None => {
                truncated = true;
                break;
            }
        }
    }
    if truncated {
        debug!(declared_entries, parsed = entries.len(), "range section truncated");
    }
    VendorDecoder::Range { max_vendor_id, default_consent, declared_entries, entries, truncated }
}

/// One entry at `pos` and its width, or `None` if the token ends inside it.
fn read_entry(buf: &BitBuffer, pos: usize) -> Option<(RangeEntry, usize)> {
    let is_range = buf.read_bit(pos).ok()?;
    let id_offset = pos + layout::RANGE_ENTRY_TYPE_WIDTH;
    let first = buf.read_uint(id_offset, VENDOR_ID_WIDTH).ok()? as u16;
    let entry = if is_range {
        let last = buf.read_uint(id_offset + VENDOR_ID_WIDTH, VENDOR_ID_WIDTH).ok()? as u16;
        RangeEntry::range(first, last)
    } else {
        RangeEntry::single(first)
    };
    Some((entry, layout::range_entry_width(is_range)))
}

/// Ids in `1..=max_vendor_id` covered by any entry. Entries are clipped and merged
/// first so overlapping hand-written ranges stay linear in `max_vendor_id`.
fn covered_ids(entries: &[RangeEntry], max_vendor_id: u16) -> BTreeSet<u16> {
    let mut spans: Vec<(u16, u16)> = entries
        .iter()
        .map(|entry| (entry.first().max(1), entry.last().min(max_vendor_id)))
        .filter(|(first, last)| first <= last)
        .collect();
    spans.sort_unstable();

    let mut out = BTreeSet::new();
    let mut next = 1u32;
    for (first, last) in spans {
        let start = u32::from(first).max(next);
        let end = u32::from(last);
        if start <= end {
            out.extend((start..=end).map(|id| id as u16));
            next = end + 1;
        }
    }
    out
}
