//! Decode fuzz target: feed arbitrary text to the token decoder and arbitrary bytes to
//! the binary decoder. Neither may panic; both return Ok(ConsentRecord) or Err(CodecError).
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    if let Ok(record) = consent_string::ConsentCodec::default().decode_bytes(data) {
        let _ = record.allowed_vendor_ids();
        let _ = consent_string::encode(&record);
    }
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = consent_string::decode(s);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
