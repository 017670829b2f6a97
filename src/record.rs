//! Logical consent record: header fields plus vendor consent, either listed explicitly
//! (built records) or backed by a decoded vendor section (decoded records).

use crate::codec::CodecError;
use crate::layout::{self, FieldSpec};
use crate::vendor_decoder::VendorDecoder;
use crate::vendor_encoder;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitOr, RangeInclusive};
use std::str::FromStr;

/// Which vendor section variant a token carries. The discriminant is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorEncodingType {
    Bitfield = 0,
    Range = 1,
}

impl VendorEncodingType {
    pub fn tag(self) -> u64 {
        self as u64
    }
}

impl TryFrom<u64> for VendorEncodingType {
    type Error = CodecError;

    fn try_from(tag: u64) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(VendorEncodingType::Bitfield),
            1 => Ok(VendorEncodingType::Range),
            other => Err(CodecError::InvalidEncodingType(other)),
        }
    }
}

impl fmt::Display for VendorEncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorEncodingType::Bitfield => f.write_str("bitfield"),
            VendorEncodingType::Range => f.write_str("range"),
        }
    }
}

/// Allowed purposes as the 24-bit wire bitmap. Purpose 1 is the most significant bit,
/// purpose 24 the least significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Purposes(u32);

impl Purposes {
    pub const STORAGE_AND_ACCESS: Purposes = Purposes(1 << 23);
    pub const PERSONALIZATION: Purposes = Purposes(1 << 22);
    pub const AD_SELECTION: Purposes = Purposes(1 << 21);
    pub const CONTENT_DELIVERY: Purposes = Purposes(1 << 20);
    pub const MEASUREMENT: Purposes = Purposes(1 << 19);

    const MASK: u32 = (1 << layout::PURPOSE_COUNT) - 1;

    pub const fn empty() -> Self {
        Purposes(0)
    }

    pub const fn all() -> Self {
        Purposes(Self::MASK)
    }

    /// Bits above the 24-bit field are dropped.
    pub const fn from_bits(bits: u32) -> Self {
        Purposes(bits & Self::MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn from_ids<I: IntoIterator<Item = u8>>(ids: I) -> Result<Self, CodecError> {
        let mut bits = 0;
        for id in ids {
            bits |= Self::bit_for(id).ok_or(CodecError::InvalidPurposeId(id))?;
        }
        Ok(Purposes(bits))
    }

    /// False for ids outside `1..=24`.
    pub fn contains(self, id: u8) -> bool {
        Self::bit_for(id).is_some_and(|bit| self.0 & bit != 0)
    }

    pub fn ids(self) -> Vec<u8> {
        (1..=layout::PURPOSE_COUNT).filter(|&id| self.contains(id)).collect()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn bit_for(id: u8) -> Option<u32> {
        if (1..=layout::PURPOSE_COUNT).contains(&id) {
            Some(1 << (layout::PURPOSE_COUNT - id))
        } else {
            None
        }
    }
}

impl BitOr for Purposes {
    type Output = Purposes;

    fn bitor(self, rhs: Purposes) -> Purposes {
        Purposes(self.0 | rhs.0)
    }
}

/// Wire value → character, the standard base64 alphabet. Values `0..=25` are `A`..=`Z`.
const LANGUAGE_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Two-letter language code, each letter stored on the wire as a 6-bit value
/// `letter - 'A'`. Built records always hold `A`..=`Z`; decoded ones keep whatever the
/// token carries and render values above 25 through the base64 alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsentLanguage {
    codes: [u8; 2],
    text: [u8; 2],
}

impl ConsentLanguage {
    /// Build from the two 6-bit wire values. Bits above the sixth are dropped.
    pub fn from_letter_codes(first: u8, second: u8) -> Self {
        let codes = [first & 0x3f, second & 0x3f];
        let text = codes.map(|code| LANGUAGE_ALPHABET[code as usize]);
        ConsentLanguage { codes, text }
    }

    pub fn letter_codes(self) -> [u8; 2] {
        self.codes
    }

    /// True when both letters are in `A`..=`Z`, the only codes the encoder writes.
    pub fn is_alphabetic(self) -> bool {
        self.codes.iter().all(|&code| code < 26)
    }

    pub fn as_str(&self) -> &str {
        // Every alphabet entry is ASCII.
        std::str::from_utf8(&self.text).unwrap_or_default()
    }
}

impl FromStr for ConsentLanguage {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes() {
            [a, b] if a.is_ascii_uppercase() && b.is_ascii_uppercase() => {
                Ok(ConsentLanguage::from_letter_codes(a - b'A', b - b'A'))
            }
            _ => Err(CodecError::InvalidLanguageCode(s.to_string())),
        }
    }
}

impl fmt::Display for ConsentLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed interval of vendor ids `[first, last]`. A one-id entry uses the single form
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEntry {
    first: u16,
    last: u16,
}

impl RangeEntry {
    pub fn single(id: u16) -> Self {
        RangeEntry { first: id, last: id }
    }

    pub fn range(first: u16, last: u16) -> Self {
        RangeEntry { first, last }
    }

    pub fn first(&self) -> u16 {
        self.first
    }

    pub fn last(&self) -> u16 {
        self.last
    }

    pub fn is_single(&self) -> bool {
        self.first == self.last
    }

    pub fn contains(&self, id: u16) -> bool {
        self.first <= id && id <= self.last
    }

    pub fn ids(&self) -> RangeInclusive<u16> {
        self.first..=self.last
    }

    /// Encoded size in bits, type bit included.
    pub fn bit_width(&self) -> usize {
        layout::range_entry_width(!self.is_single())
    }
}

impl fmt::Display for RangeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// Source of "now" for records built without explicit timestamps.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// `round(epoch_seconds * 10)`.
pub(crate) fn to_deciseconds(at: &DateTime<Utc>) -> i64 {
    (at.timestamp_millis() + 50).div_euclid(100)
}

pub(crate) fn from_deciseconds(deciseconds: u64) -> Option<DateTime<Utc>> {
    let millis = i64::try_from(deciseconds).ok()?.checked_mul(100)?;
    DateTime::from_timestamp_millis(millis)
}

/// Fixed-layout header fields shared by every record regardless of vendor encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentHeader {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub cmp_id: u16,
    pub cmp_version: u8,
    pub consent_screen: u8,
    pub consent_language: ConsentLanguage,
    pub vendor_list_version: u16,
    pub purposes: Purposes,
    pub max_vendor_id: u16,
}

impl ConsentHeader {
    pub fn version(&self) -> u8 {
        layout::SUPPORTED_VERSION as u8
    }
}

#[derive(Debug, Clone)]
enum VendorConsent {
    Listed { allowed: BTreeSet<u16>, default_consent: bool },
    Decoded(VendorDecoder),
}

/// An immutable consent record.
///
/// Records come from [`ConsentRecordBuilder`] or from decoding a token. Decoded records
/// answer vendor queries from the decoded section without expanding it into a set.
#[derive(Debug, Clone)]
pub struct ConsentRecord {
    header: ConsentHeader,
    vendors: VendorConsent,
}

impl ConsentRecord {
    pub fn builder() -> ConsentRecordBuilder {
        ConsentRecordBuilder::default()
    }

    pub(crate) fn from_decoded(header: ConsentHeader, vendors: VendorDecoder) -> Self {
        ConsentRecord { header, vendors: VendorConsent::Decoded(vendors) }
    }

    pub fn header(&self) -> &ConsentHeader {
        &self.header
    }

    pub fn version(&self) -> u8 {
        self.header.version()
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.header.created
    }

    pub fn updated(&self) -> DateTime<Utc> {
        self.header.updated
    }

    pub fn cmp_id(&self) -> u16 {
        self.header.cmp_id
    }

    pub fn cmp_version(&self) -> u8 {
        self.header.cmp_version
    }

    pub fn consent_screen(&self) -> u8 {
        self.header.consent_screen
    }

    pub fn consent_language(&self) -> ConsentLanguage {
        self.header.consent_language
    }

    pub fn vendor_list_version(&self) -> u16 {
        self.header.vendor_list_version
    }

    pub fn purposes(&self) -> Purposes {
        self.header.purposes
    }

    pub fn allowed_purposes(&self) -> Vec<u8> {
        self.header.purposes.ids()
    }

    pub fn purpose_allowed(&self, purpose_id: u8) -> bool {
        self.header.purposes.contains(purpose_id)
    }

    pub fn max_vendor_id(&self) -> u16 {
        self.header.max_vendor_id
    }

    /// False for id 0 and for ids above `max_vendor_id`.
    pub fn vendor_allowed(&self, vendor_id: u16) -> bool {
        match &self.vendors {
            VendorConsent::Listed { allowed, .. } => {
                vendor_id >= 1 && vendor_id <= self.header.max_vendor_id && allowed.contains(&vendor_id)
            }
            VendorConsent::Decoded(decoder) => decoder.is_allowed(vendor_id),
        }
    }

    /// Every allowed vendor id in `1..=max_vendor_id`.
    pub fn allowed_vendor_ids(&self) -> BTreeSet<u16> {
        match &self.vendors {
            VendorConsent::Listed { allowed, .. } => allowed.clone(),
            VendorConsent::Decoded(decoder) => decoder.allowed_ids(),
        }
    }

    /// Fallback for ids not covered by a range entry. Always false for decoded bitfield records.
    pub fn default_consent(&self) -> bool {
        match &self.vendors {
            VendorConsent::Listed { default_consent, .. } => *default_consent,
            VendorConsent::Decoded(decoder) => decoder.default_consent(),
        }
    }

    /// The tag carried by a decoded token, or the variant the default codec would pick
    /// for a built record.
    pub fn vendor_encoding(&self) -> VendorEncodingType {
        match &self.vendors {
            VendorConsent::Listed { allowed, default_consent } => {
                vendor_encoder::preferred_encoding(allowed, self.header.max_vendor_id, *default_consent)
            }
            VendorConsent::Decoded(decoder) => decoder.encoding(),
        }
    }

    /// Range entries as decoded, or as the range variant would encode them.
    pub fn range_entries(&self) -> Vec<RangeEntry> {
        match &self.vendors {
            VendorConsent::Listed { allowed, default_consent } => {
                vendor_encoder::range_entries(allowed, self.header.max_vendor_id, *default_consent)
            }
            VendorConsent::Decoded(decoder) => decoder.range_entries().to_vec(),
        }
    }

    /// Range entry count the token declares, which exceeds `range_entries().len()` when
    /// the section is truncated. Zero for decoded bitfield sections; for built records, the
    /// count the range variant would write.
    pub fn declared_range_entries(&self) -> usize {
        match &self.vendors {
            VendorConsent::Listed { .. } => self.range_entries().len(),
            VendorConsent::Decoded(decoder) => decoder.declared_entries().unwrap_or(0),
        }
    }

    /// True when the decoded vendor section ended before everything it declared.
    pub fn is_truncated(&self) -> bool {
        match &self.vendors {
            VendorConsent::Listed { .. } => false,
            VendorConsent::Decoded(decoder) => decoder.is_truncated(),
        }
    }
}

/// Records are equal when their headers match and they allow the same vendors.
impl PartialEq for ConsentRecord {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.allowed_vendor_ids() == other.allowed_vendor_ids()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsentRecordBuilder {
    created: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    cmp_id: u16,
    cmp_version: u8,
    consent_screen: u8,
    consent_language: String,
    vendor_list_version: u16,
    purposes: BTreeSet<u8>,
    max_vendor_id: Option<u16>,
    vendors: BTreeSet<u16>,
    default_consent: bool,
}

impl ConsentRecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a builder with every field of an existing record.
    pub fn from_record(record: &ConsentRecord) -> Self {
        let header = record.header();
        ConsentRecordBuilder {
            created: Some(header.created),
            updated: Some(header.updated),
            cmp_id: header.cmp_id,
            cmp_version: header.cmp_version,
            consent_screen: header.consent_screen,
            consent_language: header.consent_language.to_string(),
            vendor_list_version: header.vendor_list_version,
            purposes: header.purposes.ids().into_iter().collect(),
            max_vendor_id: Some(header.max_vendor_id),
            vendors: record.allowed_vendor_ids(),
            default_consent: record.default_consent(),
        }
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created = Some(at);
        self
    }

    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated = Some(at);
        self
    }

    pub fn cmp_id(mut self, cmp_id: u16) -> Self {
        self.cmp_id = cmp_id;
        self
    }

    pub fn cmp_version(mut self, cmp_version: u8) -> Self {
        self.cmp_version = cmp_version;
        self
    }

    pub fn consent_screen(mut self, consent_screen: u8) -> Self {
        self.consent_screen = consent_screen;
        self
    }

    pub fn consent_language(mut self, language: impl Into<String>) -> Self {
        self.consent_language = language.into();
        self
    }

    pub fn vendor_list_version(mut self, version: u16) -> Self {
        self.vendor_list_version = version;
        self
    }

    /// Replace the allowed purposes.
    pub fn purposes<I: IntoIterator<Item = u8>>(mut self, ids: I) -> Self {
        self.purposes = ids.into_iter().collect();
        self
    }

    pub fn allow_purpose(mut self, id: u8) -> Self {
        self.purposes.insert(id);
        self
    }

    pub fn max_vendor_id(mut self, max_vendor_id: u16) -> Self {
        self.max_vendor_id = Some(max_vendor_id);
        self
    }

    /// Replace the allowed vendors.
    pub fn vendors<I: IntoIterator<Item = u16>>(mut self, ids: I) -> Self {
        self.vendors = ids.into_iter().collect();
        self
    }

    pub fn allow_vendor(mut self, id: u16) -> Self {
        self.vendors.insert(id);
        self
    }

    pub fn allow_vendor_range(mut self, ids: RangeInclusive<u16>) -> Self {
        self.vendors.extend(ids);
        self
    }

    pub fn default_consent(mut self, default_consent: bool) -> Self {
        self.default_consent = default_consent;
        self
    }

    /// Build with explicit timestamps; fails with `MissingField` if either is unset.
    pub fn build(self) -> Result<ConsentRecord, CodecError> {
        let created = self.created.ok_or(CodecError::MissingField("created"))?;
        let updated = self.updated.ok_or(CodecError::MissingField("updated"))?;
        self.finish(created, updated)
    }

    /// Build, taking unset timestamps from `clock`.
    pub fn build_with_clock<C: Clock + ?Sized>(self, clock: &C) -> Result<ConsentRecord, CodecError> {
        let now = clock.now();
        let created = self.created.unwrap_or(now);
        let updated = self.updated.unwrap_or(now);
        self.finish(created, updated)
    }

    fn finish(self, created: DateTime<Utc>, updated: DateTime<Utc>) -> Result<ConsentRecord, CodecError> {
        let created = round_timestamp(&layout::CREATED, &created)?;
        let updated = round_timestamp(&layout::UPDATED, &updated)?;
        layout::CMP_ID.check(self.cmp_id.into())?;
        layout::CMP_VERSION.check(self.cmp_version.into())?;
        layout::CONSENT_SCREEN.check(self.consent_screen.into())?;
        layout::VENDOR_LIST_VERSION.check(self.vendor_list_version.into())?;
        let consent_language = self.consent_language.parse::<ConsentLanguage>()?;
        let purposes = Purposes::from_ids(self.purposes.iter().copied())?;

        let max_vendor_id = self
            .max_vendor_id
            .unwrap_or_else(|| self.vendors.last().copied().unwrap_or(0));
        if let Some(&id) = self.vendors.iter().find(|&&id| id == 0 || id > max_vendor_id) {
            return Err(CodecError::InvalidVendorId { id, max_vendor_id });
        }

        Ok(ConsentRecord {
            header: ConsentHeader {
                created,
                updated,
                cmp_id: self.cmp_id,
                cmp_version: self.cmp_version,
                consent_screen: self.consent_screen,
                consent_language,
                vendor_list_version: self.vendor_list_version,
                purposes,
                max_vendor_id,
            },
            vendors: VendorConsent::Listed {
                allowed: self.vendors,
                default_consent: self.default_consent,
            },
        })
    }
}

/// Round to decisecond precision, rejecting instants that do not fit the field.
fn round_timestamp(field: &FieldSpec, at: &DateTime<Utc>) -> Result<DateTime<Utc>, CodecError> {
    let deciseconds = to_deciseconds(at);
    let overflow = || CodecError::FieldOverflow {
        field: field.name,
        value: deciseconds as u64,
        width: field.width,
    };
    let deciseconds = u64::try_from(deciseconds).map_err(|_| overflow())?;
    field.check(deciseconds)?;
    from_deciseconds(deciseconds).ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, millis: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, millis * 1_000_000).unwrap()
    }

    fn base() -> ConsentRecordBuilder {
        ConsentRecord::builder()
            .created(at(1_510_082_155, 400))
            .updated(at(1_510_082_155, 400))
            .consent_language("EN")
    }

    #[test]
    fn purposes_map_first_id_to_msb() {
        let p = Purposes::from_ids([1, 2, 3]).unwrap();
        assert_eq!(p.bits(), 0b1110_0000_0000_0000_0000_0000);
        assert_eq!(p, Purposes::STORAGE_AND_ACCESS | Purposes::PERSONALIZATION | Purposes::AD_SELECTION);
        assert_eq!(p.ids(), vec![1, 2, 3]);
        assert!(!p.contains(0));
        assert!(!p.contains(25));
        assert_eq!(Purposes::from_bits(1).ids(), vec![24]);
    }

    #[test]
    fn purpose_id_out_of_range_rejected() {
        assert!(matches!(Purposes::from_ids([0]), Err(CodecError::InvalidPurposeId(0))));
        assert!(matches!(Purposes::from_ids([25]), Err(CodecError::InvalidPurposeId(25))));
    }

    #[test]
    fn language_letters() {
        let en: ConsentLanguage = "EN".parse().unwrap();
        assert_eq!(en.letter_codes(), [4, 13]);
        assert_eq!(ConsentLanguage::from_letter_codes(4, 13), en);
        assert!(en.is_alphabetic());
        assert_eq!(en.to_string(), "EN");
        for bad in ["en", "E", "ENG", "E1", ""] {
            assert!(matches!(bad.parse::<ConsentLanguage>(), Err(CodecError::InvalidLanguageCode(_))), "{bad}");
        }
    }

    #[test]
    fn non_letter_codes_render_through_base64_alphabet() {
        let odd = ConsentLanguage::from_letter_codes(26, 63);
        assert_eq!(odd.as_str(), "a/");
        assert_eq!(odd.letter_codes(), [26, 63]);
        assert!(!odd.is_alphabetic());
        assert_eq!(ConsentLanguage::from_letter_codes(52, 61).as_str(), "09");
    }

    #[test]
    fn deciseconds_round_to_nearest() {
        assert_eq!(to_deciseconds(&at(10, 149)), 101);
        assert_eq!(to_deciseconds(&at(10, 150)), 102);
        assert_eq!(from_deciseconds(102).unwrap(), at(10, 200));
    }

    #[test]
    fn build_requires_timestamps() {
        let err = ConsentRecord::builder().consent_language("EN").build().unwrap_err();
        assert!(matches!(err, CodecError::MissingField("created")));
        let clock = FixedClock(at(1_600_000_000, 0));
        let record = ConsentRecord::builder().consent_language("EN").build_with_clock(&clock).unwrap();
        assert_eq!(record.created(), clock.0);
        assert_eq!(record.updated(), clock.0);
    }

    #[test]
    fn build_rounds_timestamps() {
        let record = ConsentRecord::builder()
            .created(at(100, 26))
            .updated(at(100, 77))
            .consent_language("FR")
            .build()
            .unwrap();
        assert_eq!(record.created(), at(100, 0));
        assert_eq!(record.updated(), at(100, 100));
    }

    #[test]
    fn build_rejects_field_overflow() {
        let err = base().cmp_version(64).build().unwrap_err();
        assert!(matches!(err, CodecError::FieldOverflow { field: "cmpVersion", value: 64, width: 6 }));
        let err = base().cmp_id(4096).build().unwrap_err();
        assert!(matches!(err, CodecError::FieldOverflow { field: "cmpId", .. }));
        let err = base().created(at(-10, 0)).build().unwrap_err();
        assert!(matches!(err, CodecError::FieldOverflow { field: "created", .. }));
    }

    #[test]
    fn build_rejects_vendor_outside_max() {
        let err = base().max_vendor_id(10).vendors([3, 11]).build().unwrap_err();
        assert!(matches!(err, CodecError::InvalidVendorId { id: 11, max_vendor_id: 10 }));
        let err = base().vendors([0, 2]).build().unwrap_err();
        assert!(matches!(err, CodecError::InvalidVendorId { id: 0, .. }));
    }

    #[test]
    fn max_vendor_id_defaults_to_largest_allowed() {
        let record = base().vendors([4, 90, 7]).build().unwrap();
        assert_eq!(record.max_vendor_id(), 90);
        assert!(record.vendor_allowed(90));
        assert!(!record.vendor_allowed(91));
        assert!(!record.vendor_allowed(0));
    }

    #[test]
    fn builder_from_record_reproduces_record() {
        let record = base().cmp_id(7).purposes([1, 5]).vendors([1, 2, 3, 9]).build().unwrap();
        let rebuilt = ConsentRecordBuilder::from_record(&record).build().unwrap();
        assert_eq!(rebuilt, record);
    }

    #[test]
    fn range_entry_display_and_width() {
        assert_eq!(RangeEntry::single(9).to_string(), "9");
        assert_eq!(RangeEntry::range(1, 3).to_string(), "1-3");
        assert_eq!(RangeEntry::single(9).bit_width(), 17);
        assert_eq!(RangeEntry::range(1, 3).bit_width(), 33);
    }
}
