//! Encode and decode consent strings from the command line.
//!
//! Usage:
//!   consent_tool decode [--bits] TOKEN ...
//!   consent_tool encode [--encoding auto|bitfield|range] [FILE]
//!
//! `decode` prints a summary of each token; with `--bits` it also prints the raw bits.
//! `encode` reads a record description from FILE (or stdin), fills unset timestamps with
//! the current time and prints the token.
//!
//! Set RUST_LOG=debug to see which vendor encoding was chosen.

use anyhow::{anyhow, bail, Context};
use consent_string::{
    format_bits, format_record, load_record, parse_record, token_bytes, ConsentCodec, SystemClock,
    VendorEncodingPreference,
};
use std::io::{self, Read};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    if let Some(pos) = args.iter().position(|a| a == flag) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn take_option(args: &mut Vec<String>, flag: &str) -> anyhow::Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    args.remove(pos);
    if pos >= args.len() {
        bail!("{} requires a value", flag);
    }
    Ok(Some(args.remove(pos)))
}

fn parse_preference(value: &str) -> anyhow::Result<VendorEncodingPreference> {
    match value {
        "auto" => Ok(VendorEncodingPreference::Shortest),
        "bitfield" => Ok(VendorEncodingPreference::Bitfield),
        "range" => Ok(VendorEncodingPreference::Range),
        other => bail!("unknown encoding '{}' (expected auto, bitfield or range)", other),
    }
}

fn run_decode(mut args: Vec<String>) -> anyhow::Result<bool> {
    let bits = take_flag(&mut args, "--bits");
    if args.is_empty() {
        bail!("decode: no token given");
    }
    let codec = ConsentCodec::default();
    let mut ok = true;
    for (i, token) in args.iter().enumerate() {
        if i > 0 {
            println!();
        }
        match codec.decode(token) {
            Ok(record) => {
                println!("{}", format_record(&record));
                if bits {
                    println!("bits: {}", format_bits(&token_bytes(token)?));
                }
            }
            Err(e) => {
                eprintln!("{}: {}", token, e);
                ok = false;
            }
        }
    }
    Ok(ok)
}

fn run_encode(mut args: Vec<String>) -> anyhow::Result<bool> {
    let preference = match take_option(&mut args, "--encoding")? {
        Some(value) => parse_preference(&value)?,
        None => VendorEncodingPreference::Shortest,
    };
    let builder = match args.as_slice() {
        [] => {
            let mut src = String::new();
            io::stdin().read_to_string(&mut src)?;
            parse_record(&src).map_err(|e| anyhow!("<stdin>: {}", e))?
        }
        [path] => load_record(Path::new(path)).map_err(|e| anyhow!(e))?,
        _ => bail!("encode: expected at most one FILE"),
    };
    let record = builder.build_with_clock(&SystemClock).context("invalid record")?;
    let token = ConsentCodec::new(preference).encode(&record)?;
    println!("{}", token);
    Ok(true)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: consent_tool decode [--bits] TOKEN ... | encode [--encoding auto|bitfield|range] [FILE]");
    }
    let command = args.remove(0);
    let ok = match command.as_str() {
        "decode" => run_decode(args)?,
        "encode" => run_encode(args)?,
        other => bail!("unknown command '{}'", other),
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
