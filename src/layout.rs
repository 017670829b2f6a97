//! Bit layout of the version 1 consent string.
//!
//! Every header field is fixed-width and fixed-offset. Offsets are chained from the
//! previous field so the encode and decode paths share one table.

use crate::codec::CodecError;

/// A named fixed-width field: `width` bits starting at absolute bit `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
}

impl FieldSpec {
    /// Field of `width` bits placed directly after `self`.
    pub const fn followed_by(&self, name: &'static str, width: usize) -> FieldSpec {
        FieldSpec { name, offset: self.end(), width }
    }

    /// First bit after this field.
    pub const fn end(&self) -> usize {
        self.offset + self.width
    }

    /// Largest value the field can hold.
    pub const fn max_value(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Reject `value` if it needs more than `width` bits.
    pub fn check(&self, value: u64) -> Result<u64, CodecError> {
        if value > self.max_value() {
            return Err(CodecError::FieldOverflow { field: self.name, value, width: self.width });
        }
        Ok(value)
    }
}

pub const SUPPORTED_VERSION: u64 = 1;

pub const PURPOSE_COUNT: u8 = 24;
pub const LANGUAGE_LETTER_WIDTH: usize = 6;
pub const VENDOR_ID_WIDTH: usize = 16;
pub const RANGE_ENTRY_TYPE_WIDTH: usize = 1;

pub const VERSION: FieldSpec = FieldSpec { name: "version", offset: 0, width: 6 };
pub const CREATED: FieldSpec = VERSION.followed_by("created", 36);
pub const UPDATED: FieldSpec = CREATED.followed_by("updated", 36);
pub const CMP_ID: FieldSpec = UPDATED.followed_by("cmpId", 12);
pub const CMP_VERSION: FieldSpec = CMP_ID.followed_by("cmpVersion", 6);
pub const CONSENT_SCREEN: FieldSpec = CMP_VERSION.followed_by("consentScreen", 6);
pub const CONSENT_LANGUAGE: FieldSpec =
    CONSENT_SCREEN.followed_by("consentLanguage", 2 * LANGUAGE_LETTER_WIDTH);
pub const VENDOR_LIST_VERSION: FieldSpec = CONSENT_LANGUAGE.followed_by("vendorListVersion", 12);
pub const PURPOSES: FieldSpec = VENDOR_LIST_VERSION.followed_by("purposes", PURPOSE_COUNT as usize);
pub const MAX_VENDOR_ID: FieldSpec = PURPOSES.followed_by("maxVendorId", VENDOR_ID_WIDTH);
pub const ENCODING_TYPE: FieldSpec = MAX_VENDOR_ID.followed_by("encodingType", 1);

/// Vendor section start: bitmap bits (bitfield) or the range prefix (range).
pub const VENDOR_SECTION_OFFSET: usize = ENCODING_TYPE.end();

/// Range-encoding fields, relative to the start of the whole token.
pub const DEFAULT_CONSENT: FieldSpec = ENCODING_TYPE.followed_by("defaultConsent", 1);
pub const NUM_ENTRIES: FieldSpec = DEFAULT_CONSENT.followed_by("numEntries", 12);
pub const RANGE_ENTRIES_OFFSET: usize = NUM_ENTRIES.end();

/// Header fields in wire order, up to and including the encoding-type tag.
pub const HEADER_FIELDS: [FieldSpec; 11] = [
    VERSION,
    CREATED,
    UPDATED,
    CMP_ID,
    CMP_VERSION,
    CONSENT_SCREEN,
    CONSENT_LANGUAGE,
    VENDOR_LIST_VERSION,
    PURPOSES,
    MAX_VENDOR_ID,
    ENCODING_TYPE,
];

/// Bits taken by one range entry: type bit plus one id (single) or two ids (range).
pub const fn range_entry_width(is_range: bool) -> usize {
    RANGE_ENTRY_TYPE_WIDTH + if is_range { 2 * VENDOR_ID_WIDTH } else { VENDOR_ID_WIDTH }
}
