//! Format consent records and raw token bits for display (CLI dump text).

use crate::record::{ConsentRecord, RangeEntry, VendorEncodingType};
use crate::vendor_encoder::collapse_runs;
use chrono::SecondsFormat;
use std::fmt::Write as _;

/// Render ascending ids as comma-separated singles and `lo-hi` runs, e.g. "1-3, 9".
pub fn format_id_ranges<I: IntoIterator<Item = u16>>(ids: I) -> String {
    let runs = collapse_runs(ids);
    if runs.is_empty() {
        return "none".to_string();
    }
    join_entries(&runs)
}

fn join_entries(entries: &[RangeEntry]) -> String {
    entries.iter().map(RangeEntry::to_string).collect::<Vec<_>>().join(", ")
}

/// Bytes as a string of '0'/'1', grouped per byte with a space.
pub fn format_bits(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:08b}", b)).collect::<Vec<_>>().join(" ")
}

/// Multi-line summary of a record: header fields, purposes, vendors.
pub fn format_record(record: &ConsentRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "version: {}", record.version());
    let _ = writeln!(out, "created: {}", record.created().to_rfc3339_opts(SecondsFormat::Millis, true));
    let _ = writeln!(out, "updated: {}", record.updated().to_rfc3339_opts(SecondsFormat::Millis, true));
    let _ = writeln!(out, "cmp_id: {}", record.cmp_id());
    let _ = writeln!(out, "cmp_version: {}", record.cmp_version());
    let _ = writeln!(out, "consent_screen: {}", record.consent_screen());
    let _ = writeln!(out, "consent_language: {}", record.consent_language());
    let _ = writeln!(out, "vendor_list_version: {}", record.vendor_list_version());
    let purposes = record.allowed_purposes();
    let _ = writeln!(out, "purposes: {}", format_id_ranges(purposes.into_iter().map(u16::from)));
    let _ = writeln!(out, "max_vendor_id: {}", record.max_vendor_id());
    let _ = writeln!(out, "vendor_encoding: {}", record.vendor_encoding());
    if record.vendor_encoding() == VendorEncodingType::Range {
        let entries = record.range_entries();
        let _ = writeln!(out, "default_consent: {}", record.default_consent());
        let listed = if entries.is_empty() { "none".to_string() } else { join_entries(&entries) };
        let _ = writeln!(out, "range_entries: {}", listed);
    }
    if record.is_truncated() {
        let _ = writeln!(out, "truncated: true");
        if record.vendor_encoding() == VendorEncodingType::Range {
            let _ = writeln!(
                out,
                "range_entries_read: {} of {}",
                record.range_entries().len(),
                record.declared_range_entries()
            );
        }
    }
    let _ = write!(out, "vendors: {}", format_id_ranges(record.allowed_vendor_ids()));
    out
}
