//! Decoding of the obfuscated source URLs handed out by the catalog.
//!
//! An encoded URL is the literal prefix `--` followed by two-character hex
//! pairs, each standing for exactly one output character.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const PREFIX: &str = "--";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("encoded source is missing the '--' prefix")]
    MissingPrefix,
    #[error("truncated pair at position {position}")]
    TruncatedPair { position: usize },
    #[error("unknown pair '{0}'")]
    UnknownPair(String),
}

/// Pair to character mapping
static TABLE: &[(&str, char)] = &[
    // Uppercase
    ("79", 'A'), ("7a", 'B'), ("7b", 'C'), ("7c", 'D'), ("7d", 'E'), ("7e", 'F'),
    ("7f", 'G'), ("70", 'H'), ("71", 'I'), ("72", 'J'), ("73", 'K'), ("74", 'L'),
    ("75", 'M'), ("76", 'N'), ("77", 'O'), ("68", 'P'), ("69", 'Q'), ("6a", 'R'),
    ("6b", 'S'), ("6c", 'T'), ("6d", 'U'), ("6e", 'V'), ("6f", 'W'), ("60", 'X'),
    ("61", 'Y'), ("62", 'Z'),
    // Lowercase
    ("59", 'a'), ("5a", 'b'), ("5b", 'c'), ("5c", 'd'), ("5d", 'e'), ("5e", 'f'),
    ("5f", 'g'), ("50", 'h'), ("51", 'i'), ("52", 'j'), ("53", 'k'), ("54", 'l'),
    ("55", 'm'), ("56", 'n'), ("57", 'o'), ("48", 'p'), ("49", 'q'), ("4a", 'r'),
    ("4b", 's'), ("4c", 't'), ("4d", 'u'), ("4e", 'v'), ("4f", 'w'), ("40", 'x'),
    ("41", 'y'), ("42", 'z'),
    // Digits
    ("08", '0'), ("09", '1'), ("0a", '2'), ("0b", '3'), ("0c", '4'), ("0d", '5'),
    ("0e", '6'), ("0f", '7'), ("00", '8'), ("01", '9'),
    // Symbols
    ("15", '-'), ("16", '.'), ("67", '_'), ("46", '~'), ("02", ':'), ("17", '/'),
    ("07", '?'), ("1b", '#'), ("63", '['), ("65", ']'), ("78", '@'), ("19", '!'),
    ("1c", '$'), ("1e", '&'), ("10", '('), ("11", ')'), ("12", '*'), ("13", '+'),
    ("14", ','), ("03", ';'), ("05", '='), ("1d", '%'),
];

static CLOCK_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/clock(\?|/|$)").expect("static regex is valid"));

fn lookup(pair: &str) -> Option<char> {
    TABLE
        .iter()
        .find(|(code, _)| *code == pair)
        .map(|(_, c)| *c)
}

/// Decode an obfuscated source URL into a (usually relative) path
pub fn decode(encoded: &str) -> Result<String, DecodeError> {
    let body = encoded
        .strip_prefix(PREFIX)
        .ok_or(DecodeError::MissingPrefix)?;

    let bytes = body.as_bytes();
    let mut decoded = String::with_capacity(bytes.len() / 2);

    for (index, chunk) in bytes.chunks(2).enumerate() {
        let position = PREFIX.len() + index * 2;
        if chunk.len() != 2 {
            return Err(DecodeError::TruncatedPair { position });
        }
        let pair = std::str::from_utf8(chunk)
            .map_err(|_| DecodeError::UnknownPair(String::from_utf8_lossy(chunk).into_owned()))?;
        let c = lookup(pair).ok_or_else(|| DecodeError::UnknownPair(pair.to_string()))?;
        decoded.push(c);
    }

    Ok(rewrite_clock(&decoded).into_owned())
}

/// The `/clock` endpoint only answers JSON under `/clock.json`
pub fn rewrite_clock(path: &str) -> Cow<'_, str> {
    CLOCK_PATH.replace_all(path, "/clock.json$1")
}
