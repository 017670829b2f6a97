//! Parse text record descriptions into a [`ConsentRecordBuilder`] using PEST.
//!
//! ```text
//! # comment
//! created = 1510082155.4
//! updated = "2017-11-07T19:15:55.4Z"
//! cmp_id = 7
//! consent_language = "EN"
//! purposes = [1, 2, 3]
//! vendors = 1..3, 9
//! ```

use crate::record::{ConsentRecord, ConsentRecordBuilder};
use chrono::{DateTime, Utc};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::collections::HashSet;
use std::path::Path;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct RecordParser;

/// Parse a record description. Fields not mentioned keep their builder defaults, so
/// timestamps may still need a clock at build time.
pub fn parse_record(source: &str) -> Result<ConsentRecordBuilder, String> {
    let pairs = RecordParser::parse(Rule::record, source).map_err(|e| format!("Parse error: {}", e))?;
    let record = pairs.into_iter().next().ok_or("Empty parse")?;

    let mut builder = ConsentRecord::builder();
    let mut seen = HashSet::new();
    for entry in record.into_inner() {
        if entry.as_rule() != Rule::entry {
            continue;
        }
        let mut it = entry.into_inner();
        let key = it.next().ok_or("entry: key")?.as_str();
        let value = it.next().ok_or_else(|| format!("{}: missing value", key))?;
        if !seen.insert(key) {
            return Err(format!("{}: duplicate key", key));
        }
        builder = apply(builder, key, value)?;
    }
    Ok(builder)
}

/// Read and parse a record description file.
pub fn load_record(path: &Path) -> Result<ConsentRecordBuilder, String> {
    let source = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    parse_record(&source).map_err(|e| format!("{}: {}", path.display(), e))
}

fn apply(builder: ConsentRecordBuilder, key: &str, value: Pair<Rule>) -> Result<ConsentRecordBuilder, String> {
    Ok(match key {
        "created" => builder.created(timestamp(key, value)?),
        "updated" => builder.updated(timestamp(key, value)?),
        "cmp_id" => builder.cmp_id(scalar(key, value)?),
        "cmp_version" => builder.cmp_version(scalar(key, value)?),
        "consent_screen" => builder.consent_screen(scalar(key, value)?),
        "consent_language" => builder.consent_language(string(key, value)?),
        "vendor_list_version" => builder.vendor_list_version(scalar(key, value)?),
        "max_vendor_id" => builder.max_vendor_id(scalar(key, value)?),
        "default_consent" => builder.default_consent(boolean(key, value)?),
        "purposes" => builder.purposes(ids::<u8>(key, value)?),
        "vendors" => builder.vendors(ids::<u16>(key, value)?),
        other => return Err(format!("unknown key '{}'", other)),
    })
}

fn integer<T: TryFrom<u64>>(key: &str, pair: &Pair<Rule>) -> Result<T, String> {
    let n: u64 = pair
        .as_str()
        .parse()
        .map_err(|_| format!("{}: invalid integer '{}'", key, pair.as_str()))?;
    T::try_from(n).map_err(|_| format!("{}: value {} out of range", key, n))
}

fn scalar<T: TryFrom<u64>>(key: &str, value: Pair<Rule>) -> Result<T, String> {
    match value.as_rule() {
        Rule::integer => integer(key, &value),
        _ => Err(format!("{}: expected an integer, got '{}'", key, value.as_str())),
    }
}

fn boolean(key: &str, value: Pair<Rule>) -> Result<bool, String> {
    match (value.as_rule(), value.as_str()) {
        (Rule::boolean, "true") => Ok(true),
        (Rule::boolean, "false") => Ok(false),
        _ => Err(format!("{}: expected true or false, got '{}'", key, value.as_str())),
    }
}

fn string(key: &str, value: Pair<Rule>) -> Result<String, String> {
    if value.as_rule() != Rule::string {
        return Err(format!("{}: expected a quoted string", key));
    }
    let text = value.into_inner().next().map(|p| p.as_str()).unwrap_or("");
    Ok(text.to_string())
}

/// Integer, span, or list of both. Spans are inclusive.
fn ids<T>(key: &str, value: Pair<Rule>) -> Result<Vec<T>, String>
where
    T: TryFrom<u64> + Copy + Ord,
    std::ops::RangeInclusive<T>: Iterator<Item = T>,
{
    let items: Vec<Pair<Rule>> = match value.as_rule() {
        Rule::integer | Rule::span => vec![value],
        Rule::bracket_list | Rule::bare_list => {
            // A lone span parses as `bare_list > span`; the list wrapper adds nothing.
            value.into_inner().collect()
        }
        _ => return Err(format!("{}: expected a list of ids, got '{}'", key, value.as_str())),
    };
    let mut out = Vec::new();
    for item in items {
        match item.as_rule() {
            Rule::integer => out.push(integer(key, &item)?),
            Rule::span => {
                let mut bounds = item.into_inner();
                let lo: T = integer(key, &bounds.next().ok_or("span: start")?)?;
                let hi: T = integer(key, &bounds.next().ok_or("span: end")?)?;
                if lo > hi {
                    return Err(format!("{}: empty span", key));
                }
                out.extend(lo..=hi);
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Epoch seconds with up to millisecond decimals, or a quoted RFC 3339 instant.
fn timestamp(key: &str, value: Pair<Rule>) -> Result<DateTime<Utc>, String> {
    match value.as_rule() {
        Rule::integer | Rule::decimal => {
            let s = value.as_str();
            let (secs, frac) = s.split_once('.').unwrap_or((s, ""));
            let secs: i64 = secs.parse().map_err(|_| format!("{}: invalid timestamp '{}'", key, s))?;
            let millis: i64 = format!("{:0<3}", frac)[..3]
                .parse()
                .map_err(|_| format!("{}: invalid timestamp '{}'", key, s))?;
            secs.checked_mul(1000)
                .and_then(|ms| ms.checked_add(millis))
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| format!("{}: timestamp '{}' out of range", key, s))
        }
        Rule::string => {
            let text = string(key, value)?;
            DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("{}: {}", key, e))
        }
        _ => Err(format!("{}: expected a timestamp, got '{}'", key, value.as_str())),
    }
}
