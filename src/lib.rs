//! # consent-string: compact binary consent strings
//!
//! Encodes a user's advertising-consent choices (allowed purposes, allowed vendors and
//! some provenance metadata) into a short URL-safe base64 token, and decodes such tokens
//! back into queryable records.
//!
//! ## Wire format (version 1)
//!
//! A big-endian, MSB-first bit stream padded with zero bits to a byte boundary:
//!
//! | Field | Offset | Bits |
//! |-------|--------|------|
//! | version | 0 | 6 |
//! | created (deciseconds) | 6 | 36 |
//! | updated (deciseconds) | 42 | 36 |
//! | cmpId | 78 | 12 |
//! | cmpVersion | 90 | 6 |
//! | consentScreen | 96 | 6 |
//! | consentLanguage | 102 | 12 |
//! | vendorListVersion | 114 | 12 |
//! | purposesAllowed | 126 | 24 |
//! | maxVendorId | 150 | 16 |
//! | encodingType | 166 | 1 |
//!
//! The vendor section follows at bit 167: either one bit per vendor id (bitfield) or a
//! default-consent flag, a 12-bit entry count and a list of single ids / closed ranges
//! (range). The encoder emits whichever yields the shorter token.
//!
//! ## Usage
//!
//! ```no_run
//! use consent_string::{decode, encode, ConsentRecord, SystemClock};
//!
//! let record = ConsentRecord::builder()
//!     .cmp_id(7)
//!     .consent_language("EN")
//!     .purposes([1, 2, 3])
//!     .vendors([1, 2, 3, 9])
//!     .build_with_clock(&SystemClock)?;
//! let token = encode(&record)?;
//! assert!(decode(&token)?.vendor_allowed(9));
//! # Ok::<(), consent_string::CodecError>(())
//! ```

pub mod bits;
pub mod codec;
pub mod dump;
pub mod layout;
pub mod parser;
pub mod record;
pub mod vendor_decoder;
pub mod vendor_encoder;

pub use bits::{BitBuffer, BitError};
pub use codec::{decode, encode, token_bytes, CodecError, ConsentCodec, VendorEncodingPreference};
pub use dump::{format_bits, format_id_ranges, format_record};
pub use parser::{load_record, parse_record};
pub use record::{
    Clock, ConsentHeader, ConsentLanguage, ConsentRecord, ConsentRecordBuilder, FixedClock, Purposes,
    RangeEntry, SystemClock, VendorEncodingType,
};
pub use vendor_decoder::VendorDecoder;
pub use vendor_encoder::VendorSection;
