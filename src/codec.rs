//! Encode/decode consent strings.
//!
//! Encoding packs the fixed header, builds both vendor section candidates, keeps the
//! shorter one, pads to a byte boundary and emits unpadded URL-safe base64. Decoding
//! reverses this; header fields are mandatory, the vendor section is read leniently.

use crate::bits::{BitBuffer, BitError};
use crate::layout::{
    FieldSpec, CMP_ID, CMP_VERSION, CONSENT_LANGUAGE, CONSENT_SCREEN, CREATED, ENCODING_TYPE,
    LANGUAGE_LETTER_WIDTH, MAX_VENDOR_ID, PURPOSES, SUPPORTED_VERSION, UPDATED, VENDOR_LIST_VERSION,
    VENDOR_SECTION_OFFSET, VERSION,
};
use crate::record::{
    from_deciseconds, to_deciseconds, ConsentHeader, ConsentLanguage, ConsentRecord, Purposes,
    VendorEncodingType,
};
use crate::vendor_decoder::VendorDecoder;
use crate::vendor_encoder::{self, VendorSection};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

/// URL-safe alphabet, no padding on output, canonical padding on input (tokens are
/// re-padded before decoding). Trailing bits are tolerated for hand-written tokens.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed input: {0}")]
    MalformedInput(#[from] base64::DecodeError),
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u64),
    #[error("Invalid encoding type: {0}")]
    InvalidEncodingType(u64),
    #[error("Invalid language code: {0}")]
    InvalidLanguageCode(String),
    #[error("Field overflow: {field} = {value} does not fit in {width} bits")]
    FieldOverflow { field: &'static str, value: u64, width: usize },
    #[error("Truncated input: {field} needs {needed} bits, token has {available}")]
    TruncatedInput { field: &'static str, needed: usize, available: usize },
    #[error("Invalid purpose id: {0}")]
    InvalidPurposeId(u8),
    #[error("Invalid vendor id: {id} (max vendor id {max_vendor_id})")]
    InvalidVendorId { id: u16, max_vendor_id: u16 },
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Bits(#[from] BitError),
}

/// Which vendor section variant [`ConsentCodec::encode`] emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VendorEncodingPreference {
    /// Whichever variant gives the shorter token; the bitfield on a tie.
    #[default]
    Shortest,
    Bitfield,
    /// Fails with `FieldOverflow` if the range list needs more entries than the count field holds.
    Range,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsentCodec {
    pub preference: VendorEncodingPreference,
}

impl ConsentCodec {
    pub fn new(preference: VendorEncodingPreference) -> Self {
        ConsentCodec { preference }
    }

    /// Encode a record as an unpadded URL-safe base64 token.
    pub fn encode(&self, record: &ConsentRecord) -> Result<String, CodecError> {
        let bytes = self.encode_bytes(record)?;
        Ok(TOKEN_ENGINE.encode(bytes))
    }

    /// Encode a record to its raw, byte-padded binary form.
    pub fn encode_bytes(&self, record: &ConsentRecord) -> Result<Vec<u8>, CodecError> {
        let header = record.header();
        if !header.consent_language.is_alphabetic() {
            return Err(CodecError::InvalidLanguageCode(header.consent_language.to_string()));
        }
        let section = self.vendor_section(record)?;
        let mut buf = BitBuffer::with_bit_len(VENDOR_SECTION_OFFSET + section.bit_len());

        write_field(&mut buf, &VERSION, SUPPORTED_VERSION)?;
        write_field(&mut buf, &CREATED, timestamp_value(&CREATED, &header.created)?)?;
        write_field(&mut buf, &UPDATED, timestamp_value(&UPDATED, &header.updated)?)?;
        write_field(&mut buf, &CMP_ID, header.cmp_id.into())?;
        write_field(&mut buf, &CMP_VERSION, header.cmp_version.into())?;
        write_field(&mut buf, &CONSENT_SCREEN, header.consent_screen.into())?;
        let [first, second] = header.consent_language.letter_codes();
        let language = (u64::from(first) << LANGUAGE_LETTER_WIDTH) | u64::from(second);
        write_field(&mut buf, &CONSENT_LANGUAGE, language)?;
        write_field(&mut buf, &VENDOR_LIST_VERSION, header.vendor_list_version.into())?;
        write_field(&mut buf, &PURPOSES, header.purposes.bits().into())?;
        write_field(&mut buf, &MAX_VENDOR_ID, header.max_vendor_id.into())?;
        write_field(&mut buf, &ENCODING_TYPE, section.encoding().tag())?;
        buf.write_bits(VENDOR_SECTION_OFFSET, section.bits());
        buf.pad_to_byte();

        debug!(bytes = buf.byte_len(), encoding = %section.encoding(), "encoded consent record");
        Ok(buf.into_bytes())
    }

    /// Decode a base64 token. `=` padding may be present or missing; `+` and `/` are
    /// accepted in place of `-` and `_`.
    pub fn decode(&self, token: &str) -> Result<ConsentRecord, CodecError> {
        self.decode_bytes(token_bytes(token)?)
    }

    /// Decode the raw binary form. Fails if any header field is missing or invalid.
    pub fn decode_bytes(&self, bytes: impl Into<Vec<u8>>) -> Result<ConsentRecord, CodecError> {
        let buf = BitBuffer::from_bytes(bytes.into());

        let version = read_field(&buf, &VERSION)?;
        if version != SUPPORTED_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let created = read_timestamp(&buf, &CREATED)?;
        let updated = read_timestamp(&buf, &UPDATED)?;
        let cmp_id = read_field(&buf, &CMP_ID)? as u16;
        let cmp_version = read_field(&buf, &CMP_VERSION)? as u8;
        let consent_screen = read_field(&buf, &CONSENT_SCREEN)? as u8;
        let language = read_field(&buf, &CONSENT_LANGUAGE)?;
        let letter_mask = (1u64 << LANGUAGE_LETTER_WIDTH) - 1;
        let consent_language = ConsentLanguage::from_letter_codes(
            (language >> LANGUAGE_LETTER_WIDTH) as u8,
            (language & letter_mask) as u8,
        );
        let vendor_list_version = read_field(&buf, &VENDOR_LIST_VERSION)? as u16;
        let purposes = Purposes::from_bits(read_field(&buf, &PURPOSES)? as u32);
        let max_vendor_id = read_field(&buf, &MAX_VENDOR_ID)? as u16;
        let encoding = VendorEncodingType::try_from(read_field(&buf, &ENCODING_TYPE)?)?;
        trace!(bytes = buf.byte_len(), %encoding, max_vendor_id, "decoded consent header");

        let header = ConsentHeader {
            created,
            updated,
            cmp_id,
            cmp_version,
            consent_screen,
            consent_language,
            vendor_list_version,
            purposes,
            max_vendor_id,
        };
        let vendors = VendorDecoder::read(&buf, encoding, max_vendor_id);
        Ok(ConsentRecord::from_decoded(header, vendors))
    }

    fn vendor_section(&self, record: &ConsentRecord) -> Result<VendorSection, CodecError> {
        let allowed = record.allowed_vendor_ids();
        let max_vendor_id = record.max_vendor_id();
        let default_consent = record.default_consent();
        match self.preference {
            VendorEncodingPreference::Bitfield => vendor_encoder::bitfield_section(&allowed, max_vendor_id),
            VendorEncodingPreference::Range => {
                vendor_encoder::range_section(&allowed, max_vendor_id, default_consent)
            }
            VendorEncodingPreference::Shortest => {
                let bitfield = vendor_encoder::bitfield_section(&allowed, max_vendor_id)?;
                let range = match vendor_encoder::range_section(&allowed, max_vendor_id, default_consent) {
                    Ok(section) => Some(section),
                    Err(CodecError::FieldOverflow { .. }) => None,
                    Err(e) => return Err(e),
                };
                Ok(vendor_encoder::select_shortest(bitfield, range))
            }
        }
    }
}

/// Encode with the default codec (shortest vendor section).
pub fn encode(record: &ConsentRecord) -> Result<String, CodecError> {
    ConsentCodec::default().encode(record)
}

/// Decode with the default codec.
pub fn decode(token: &str) -> Result<ConsentRecord, CodecError> {
    ConsentCodec::default().decode(token)
}

/// Base64-decode a token to its raw bytes without interpreting them.
pub fn token_bytes(token: &str) -> Result<Vec<u8>, CodecError> {
    Ok(TOKEN_ENGINE.decode(pad_token(token))?)
}

/// Strip any `=` padding, map the standard alphabet onto the URL-safe one and re-pad to
/// a multiple of four characters.
fn pad_token(token: &str) -> String {
    let trimmed = token.trim().trim_end_matches('=');
    let mut out: String = trimmed
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    let padding = (4 - out.len() % 4) % 4;
    out.extend(std::iter::repeat('=').take(padding));
    out
}

fn write_field(buf: &mut BitBuffer, field: &FieldSpec, value: u64) -> Result<(), CodecError> {
    buf.write_uint(value, field.offset, field.width).map_err(|e| match e {
        BitError::IntegerTooLarge { value, width } => CodecError::FieldOverflow { field: field.name, value, width },
        other => CodecError::Bits(other),
    })
}

fn read_field(buf: &BitBuffer, field: &FieldSpec) -> Result<u64, CodecError> {
    buf.read_uint(field.offset, field.width).map_err(|e| match e {
        BitError::OutOfRange { bit_len, .. } => CodecError::TruncatedInput {
            field: field.name,
            needed: field.end(),
            available: bit_len,
        },
        other => CodecError::Bits(other),
    })
}

fn timestamp_value(field: &FieldSpec, at: &DateTime<Utc>) -> Result<u64, CodecError> {
    let deciseconds = to_deciseconds(at);
    u64::try_from(deciseconds).map_err(|_| CodecError::FieldOverflow {
        field: field.name,
        value: deciseconds as u64,
        width: field.width,
    })
}

fn read_timestamp(buf: &BitBuffer, field: &FieldSpec) -> Result<DateTime<Utc>, CodecError> {
    let deciseconds = read_field(buf, field)?;
    from_deciseconds(deciseconds).ok_or(CodecError::FieldOverflow {
        field: field.name,
        value: deciseconds,
        width: field.width,
    })
}
