//! Integration tests: build records, encode to tokens, decode tokens (including truncated
//! and hand-crafted ones) and query them.
//!
//! ## Test index (expected behaviour)
//!
//! | Test | Behaviour |
//! |------|-----------|
//! | `test_known_bitfield_token` | Even vendors up to 20 encode to a fixed 32-char bitfield token |
//! | `test_known_range_token` | Sparse vendors {1,2,3,9} with max 2000 encode to a fixed range token |
//! | `test_round_trip_preserves_header_and_vendors` | decode(encode(r)) equals r field for field |
//! | `test_default_consent_round_trip` | Range with defaultConsent=true allows every id except the listed ones |
//! | `test_empty_vendor_set` | No vendors, large max → zero-entry range section, nothing allowed |
//! | `test_zero_max_vendor_id` | maxVendorId 0 → empty bitmap, every vendor query false |
//! | `test_out_of_bounds_queries` | purpose 0/25 and vendor 0/max+1 are false under both encodings |
//! | `test_decode_is_idempotent` | Decoding a token twice gives identical records |
//! | `test_truncated_bitfield_section` | Bitmap cut short → ids past the end are not allowed |
//! | `test_truncated_range_section` | Entries past the end are dropped; with default false unmatched ids are not allowed |
//! | `test_truncated_range_section_keeps_default_consent` | Truncated list with default true: unmatched ids answer true |
//! | `test_trailing_data_is_ignored` | Extra bytes after the vendor section do not change answers |
//! | `test_header_errors_are_fatal` | Malformed base64, short header, bad version → named errors |
//! | `test_non_letter_language_decodes_but_does_not_encode` | Letter codes above 25 decode via the base64 alphabet; re-encoding fails |
//! | `test_encode_rejects_invalid_records` | Overflowing fields and bad language fail at build time |
//! | `test_forced_range_overflow` | Forcing range with 4096 runs fails; shortest falls back to bitfield |
//! | `test_rebuild_from_decoded` | A decoded record re-seeds a builder and re-encodes to the same token |

use chrono::{DateTime, TimeZone, Utc};
use consent_string::codec::token_bytes;
use consent_string::{
    decode, encode, CodecError, ConsentCodec, ConsentRecord, ConsentRecordBuilder, RangeEntry,
    VendorEncodingPreference, VendorEncodingType,
};
use std::collections::BTreeSet;

const BITFIELD_TOKEN: &str = "BOEFEAyOEFEAyAHBDENAI4AAAABQqqqg";
const RANGE_TOKEN: &str = "BOEFEAyOEFEAyAHBDENAI4AAAB9CACgACAAYACQ";

fn sample_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_510_082_155, 400_000_000).unwrap()
}

fn base() -> ConsentRecordBuilder {
    ConsentRecord::builder()
        .created(sample_time())
        .updated(sample_time())
        .cmp_id(7)
        .cmp_version(1)
        .consent_screen(3)
        .consent_language("EN")
        .vendor_list_version(8)
        .purposes([1, 2, 3])
}

fn ids(record: &ConsentRecord) -> Vec<u16> {
    record.allowed_vendor_ids().into_iter().collect()
}

#[test]
fn test_known_bitfield_token() {
    let record = base().max_vendor_id(20).vendors((2..=20).step_by(2)).build().expect("build");
    let token = encode(&record).expect("encode");
    assert_eq!(token, BITFIELD_TOKEN);
    assert_eq!(token_bytes(&token).expect("bytes").len(), 24);

    let decoded = decode(&token).expect("decode");
    assert_eq!(decoded.vendor_encoding(), VendorEncodingType::Bitfield);
    assert_eq!(ids(&decoded), vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
}

#[test]
fn test_known_range_token() {
    let record = base().max_vendor_id(2000).vendors([1, 2, 3, 9]).build().expect("build");
    assert_eq!(encode(&record).expect("encode"), RANGE_TOKEN);

    let decoded = decode(RANGE_TOKEN).expect("decode");
    assert_eq!(decoded.vendor_encoding(), VendorEncodingType::Range);
    assert_eq!(decoded.range_entries(), vec![RangeEntry::range(1, 3), RangeEntry::single(9)]);
    assert!(!decoded.default_consent());
    assert!(!decoded.is_truncated());
}

#[test]
fn test_round_trip_preserves_header_and_vendors() {
    let record = base()
        .consent_language("FR")
        .purposes([1, 5, 24])
        .max_vendor_id(700)
        .allow_vendor_range(10..=40)
        .allow_vendor(512)
        .allow_vendor(700)
        .build()
        .expect("build");
    let decoded = decode(&encode(&record).expect("encode")).expect("decode");
    assert_eq!(decoded.header(), record.header());
    assert_eq!(decoded.created(), sample_time());
    assert_eq!(decoded.consent_language().as_str(), "FR");
    assert_eq!(decoded.allowed_purposes(), vec![1, 5, 24]);
    for id in 1..=700 {
        assert_eq!(decoded.vendor_allowed(id), record.vendor_allowed(id), "vendor {}", id);
    }
    assert_eq!(decoded, record);
}

#[test]
fn test_default_consent_round_trip() {
    let record = base()
        .max_vendor_id(1000)
        .vendors((1..=1000).filter(|&id| id != 17 && !(300..=310).contains(&id)))
        .default_consent(true)
        .build()
        .expect("build");
    assert_eq!(record.vendor_encoding(), VendorEncodingType::Range);
    let decoded = decode(&encode(&record).expect("encode")).expect("decode");
    assert!(decoded.default_consent());
    assert_eq!(decoded.range_entries(), vec![RangeEntry::single(17), RangeEntry::range(300, 310)]);
    assert!(decoded.vendor_allowed(1));
    assert!(!decoded.vendor_allowed(17));
    assert!(!decoded.vendor_allowed(305));
    assert!(decoded.vendor_allowed(1000));
    assert!(!decoded.vendor_allowed(1001));
    assert_eq!(decoded, record);
}

#[test]
fn test_empty_vendor_set() {
    let record = base().max_vendor_id(3000).build().expect("build");
    let token = encode(&record).expect("encode");
    // 167 header bits + 13 range bits = 180 bits → 23 bytes.
    assert_eq!(token_bytes(&token).expect("bytes").len(), 23);
    let decoded = decode(&token).expect("decode");
    assert_eq!(decoded.vendor_encoding(), VendorEncodingType::Range);
    assert!(decoded.range_entries().is_empty());
    assert!(decoded.allowed_vendor_ids().is_empty());
}

#[test]
fn test_zero_max_vendor_id() {
    let record = base().build().expect("build");
    assert_eq!(record.max_vendor_id(), 0);
    let decoded = decode(&encode(&record).expect("encode")).expect("decode");
    assert_eq!(decoded.max_vendor_id(), 0);
    assert_eq!(decoded.vendor_encoding(), VendorEncodingType::Bitfield);
    assert!(!decoded.vendor_allowed(0));
    assert!(!decoded.vendor_allowed(1));
}

#[test]
fn test_out_of_bounds_queries() {
    for preference in [VendorEncodingPreference::Bitfield, VendorEncodingPreference::Range] {
        let codec = ConsentCodec::new(preference);
        let record = base().max_vendor_id(50).allow_vendor_range(1..=50).build().expect("build");
        let decoded = codec.decode(&codec.encode(&record).expect("encode")).expect("decode");
        assert!(!decoded.purpose_allowed(0));
        assert!(!decoded.purpose_allowed(25));
        assert!(decoded.purpose_allowed(1));
        assert!(!decoded.vendor_allowed(0));
        assert!(decoded.vendor_allowed(50));
        assert!(!decoded.vendor_allowed(51));
        assert!(!decoded.vendor_allowed(u16::MAX));
    }
}

#[test]
fn test_decode_is_idempotent() {
    for token in [BITFIELD_TOKEN, RANGE_TOKEN] {
        let a = decode(token).expect("decode");
        let b = decode(token).expect("decode");
        assert_eq!(a.header(), b.header());
        assert_eq!(a.range_entries(), b.range_entries());
        assert_eq!(a, b);
    }
}

#[test]
fn test_truncated_bitfield_section() {
    let record = base().max_vendor_id(400).vendors([1, 8, 20, 390]).build().expect("build");
    let codec = ConsentCodec::new(VendorEncodingPreference::Bitfield);
    let bytes = codec.encode_bytes(&record).expect("encode");
    // Keep the header and the first 17 bitmap bits (vendors 1..=17).
    let decoded = codec.decode_bytes(&bytes[..23]).expect("decode");
    assert!(decoded.is_truncated());
    assert!(decoded.vendor_allowed(1));
    assert!(decoded.vendor_allowed(8));
    assert!(!decoded.vendor_allowed(20));
    assert!(!decoded.vendor_allowed(390));
    assert_eq!(ids(&decoded), vec![1, 8]);
}

#[test]
fn test_truncated_range_section() {
    let record = base().max_vendor_id(2000).vendors([1, 2, 3, 9, 500]).build().expect("build");
    let codec = ConsentCodec::new(VendorEncodingPreference::Range);
    let bytes = codec.encode_bytes(&record).expect("encode");
    // Header 167 + prefix 13 + [1-3] 33 = 213 bits; 27 bytes end inside the second entry.
    let decoded = codec.decode_bytes(&bytes[..27]).expect("decode");
    assert!(decoded.is_truncated());
    assert_eq!(decoded.range_entries(), vec![RangeEntry::range(1, 3)]);
    assert!(decoded.vendor_allowed(2));
    assert!(!decoded.vendor_allowed(9));
    assert!(!decoded.vendor_allowed(500));

    let header_only = codec.decode_bytes(&bytes[..21]).expect("decode");
    assert!(header_only.allowed_vendor_ids().is_empty());
}

#[test]
fn test_truncated_range_section_keeps_default_consent() {
    let denied: Vec<u16> = [5].into_iter().chain(9..=12).chain([500]).collect();
    let record = base()
        .max_vendor_id(2000)
        .vendors((1..=2000).filter(|id| !denied.contains(id)))
        .default_consent(true)
        .build()
        .expect("build");
    let codec = ConsentCodec::new(VendorEncodingPreference::Range);
    let bytes = codec.encode_bytes(&record).expect("encode");
    // Header 167 + prefix 13 + [5] 17 = 197 bits; 25 bytes end inside the [9-12] entry.
    let decoded = codec.decode_bytes(&bytes[..25]).expect("decode");
    assert!(decoded.is_truncated());
    assert!(decoded.default_consent());
    assert_eq!(decoded.range_entries(), vec![RangeEntry::single(5)]);
    assert_eq!(decoded.declared_range_entries(), 3);
    assert!(decoded.vendor_allowed(1));
    assert!(decoded.vendor_allowed(100));
    assert!(!decoded.vendor_allowed(5));
    assert!(decoded.vendor_allowed(10));
    assert!(decoded.vendor_allowed(500));
    assert!(!decoded.vendor_allowed(2001));
    assert_eq!(decoded.allowed_vendor_ids().len(), 1999);
}

#[test]
fn test_trailing_data_is_ignored() {
    let mut bytes = token_bytes(RANGE_TOKEN).expect("bytes");
    bytes.extend_from_slice(&[0xff; 16]);
    let decoded = ConsentCodec::default().decode_bytes(bytes).expect("decode");
    assert_eq!(ids(&decoded), vec![1, 2, 3, 9]);
    assert!(!decoded.is_truncated());
}

#[test]
fn test_header_errors_are_fatal() {
    assert!(matches!(decode("not base64!"), Err(CodecError::MalformedInput(_))));
    assert!(matches!(decode("BOEFEAyO"), Err(CodecError::TruncatedInput { field: "updated", .. })));

    let mut bytes = token_bytes(BITFIELD_TOKEN).expect("bytes");
    bytes[0] = 0;
    assert!(matches!(
        ConsentCodec::default().decode_bytes(bytes),
        Err(CodecError::UnsupportedVersion(0))
    ));

}

#[test]
fn test_non_letter_language_decodes_but_does_not_encode() {
    // Letters become 7 and 61: 'H' and the base64 digit '9'.
    let mut bytes = token_bytes(BITFIELD_TOKEN).expect("bytes");
    bytes[13] |= 0b0011_1111;
    let decoded = ConsentCodec::default().decode_bytes(bytes).expect("decode");
    assert_eq!(decoded.consent_language().letter_codes(), [7, 61]);
    assert_eq!(decoded.consent_language().as_str(), "H9");
    assert_eq!(ids(&decoded), vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    assert!(matches!(encode(&decoded), Err(CodecError::InvalidLanguageCode(_))));
}

#[test]
fn test_encode_rejects_invalid_records() {
    assert!(matches!(
        base().consent_language("en").build(),
        Err(CodecError::InvalidLanguageCode(_))
    ));
    assert!(matches!(
        base().consent_screen(64).build(),
        Err(CodecError::FieldOverflow { field: "consentScreen", .. })
    ));
    assert!(matches!(
        base().vendor_list_version(4096).build(),
        Err(CodecError::FieldOverflow { field: "vendorListVersion", .. })
    ));
    assert!(matches!(base().purposes([0]).build(), Err(CodecError::InvalidPurposeId(0))));
}

#[test]
fn test_forced_range_overflow() {
    let record = base().max_vendor_id(8192).vendors((1..=8192).step_by(2)).build().expect("build");
    let forced = ConsentCodec::new(VendorEncodingPreference::Range).encode(&record);
    assert!(matches!(forced, Err(CodecError::FieldOverflow { field: "numEntries", .. })));

    let token = encode(&record).expect("encode");
    let decoded = decode(&token).expect("decode");
    assert_eq!(decoded.vendor_encoding(), VendorEncodingType::Bitfield);
    assert_eq!(decoded.allowed_vendor_ids().len(), 4096);
}

#[test]
fn test_rebuild_from_decoded() {
    let decoded = decode(RANGE_TOKEN).expect("decode");
    let rebuilt = ConsentRecordBuilder::from_record(&decoded).build().expect("build");
    assert_eq!(encode(&rebuilt).expect("encode"), RANGE_TOKEN);

    let extended = ConsentRecordBuilder::from_record(&decoded).allow_vendor(10).build().expect("build");
    let expected: BTreeSet<u16> = [1, 2, 3, 9, 10].into_iter().collect();
    assert_eq!(decode(&encode(&extended).expect("encode")).expect("decode").allowed_vendor_ids(), expected);
}
