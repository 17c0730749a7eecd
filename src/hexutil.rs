//! Hex encoding and human-friendly duration parsing.

use std::time::Duration;

/// The four bit-exact hex encodings this crate supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexMode {
    /// `"0fa100ff"`
    Lower,
    /// `"0FA100FF"`
    Upper,
    /// `"0f:a1:00:ff"`
    LowerColon,
    /// `"0F:A1:00:FF"`
    UpperColon,
}

/// Encode `bytes` per `mode`. Empty input yields an empty string in every
/// mode; leading zero nibbles are always preserved (each byte becomes
/// exactly two hex characters).
pub fn hex_encode(bytes: &[u8], mode: HexMode) -> String {
    match mode {
        HexMode::Lower => hex::encode(bytes),
        HexMode::Upper => hex::encode_upper(bytes),
        HexMode::LowerColon => join_colon(&hex::encode(bytes)),
        HexMode::UpperColon => join_colon(&hex::encode_upper(bytes)),
    }
}

fn join_colon(plain: &str) -> String {
    plain
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).expect("hex output is ASCII"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a human-friendly duration: `"1y"` (365d), `"6m"` (30d), `"3d"`,
/// `"4s"`, case-insensitive on the unit suffix. Anything else falls
/// through to the standard `humantime`-style grammar (`"1h30m"`, etc),
/// which [`parse_std_duration`] implements directly since this crate has
/// no dependency on an external duration-parsing crate beyond what it
/// already needs for the four named shorthands.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }

    if let Some(d) = parse_shorthand(input) {
        return Ok(d);
    }

    parse_std_duration(input)
}

fn parse_shorthand(input: &str) -> Option<Duration> {
    let lower = input.to_ascii_lowercase();
    let (digits, unit_secs) = if let Some(n) = lower.strip_suffix('y') {
        (n, 365 * 24 * 3600)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 30 * 24 * 3600)
    } else if let Some(n) = lower.strip_suffix('d') {
        (n, 24 * 3600)
    } else if let Some(n) = lower.strip_suffix('s') {
        (n, 1)
    } else {
        return None;
    };

    let n: u64 = digits.parse().ok()?;
    Some(Duration::from_secs(n * unit_secs))
}

/// A minimal `"1h30m"`-style duration grammar: a sequence of
/// `<integer><unit>` pairs where unit is one of `h`, `m`, `s`, `ms`,
/// summed together. This mirrors the fallback the source duration
/// parser offers once the named shorthands (y/m/d/s) don't match.
fn parse_std_duration(input: &str) -> Result<Duration, DurationParseError> {
    let mut total = Duration::ZERO;
    let mut rest = input;
    let mut matched_any = false;

    while !rest.is_empty() {
        let digit_end = rest.find(|c: char| !c.is_ascii_digit()).ok_or(DurationParseError::Invalid)?;
        if digit_end == 0 {
            return Err(DurationParseError::Invalid);
        }
        let (num_str, tail) = rest.split_at(digit_end);
        let num: u64 = num_str.parse().map_err(|_| DurationParseError::Invalid)?;

        let unit_end = tail.find(|c: char| c.is_ascii_digit()).unwrap_or(tail.len());
        let (unit, remaining) = tail.split_at(unit_end);

        let secs = match unit {
            "h" => num.checked_mul(3600),
            "m" => num.checked_mul(60),
            "s" => Some(num),
            "ms" => {
                total += Duration::from_millis(num);
                matched_any = true;
                rest = remaining;
                continue;
            }
            _ => return Err(DurationParseError::Invalid),
        };
        total += Duration::from_secs(secs.ok_or(DurationParseError::Invalid)?);
        matched_any = true;
        rest = remaining;
    }

    if !matched_any {
        return Err(DurationParseError::Invalid);
    }
    Ok(total)
}

/// Errors produced by [`parse_duration`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DurationParseError {
    /// The input string was empty.
    #[error("duration string is empty")]
    Empty,
    /// The input didn't match any recognized grammar.
    #[error("invalid duration string")]
    Invalid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hex_modes_on_fixed_bytes() {
        let bytes = [0x0f, 0xa1, 0x00, 0xff];
        assert_eq!(hex_encode(&bytes, HexMode::Lower), "0fa100ff");
        assert_eq!(hex_encode(&bytes, HexMode::Upper), "0FA100FF");
        assert_eq!(hex_encode(&bytes, HexMode::LowerColon), "0f:a1:00:ff");
        assert_eq!(hex_encode(&bytes, HexMode::UpperColon), "0F:A1:00:FF");
    }

    #[test]
    fn hex_empty_input() {
        for mode in [HexMode::Lower, HexMode::Upper, HexMode::LowerColon, HexMode::UpperColon] {
            assert_eq!(hex_encode(&[], mode), "");
        }
    }

    #[test]
    fn hex_leading_zero_preserved() {
        assert_eq!(hex_encode(&[0x00], HexMode::Lower), "00");
    }

    #[test]
    fn colon_strips_to_plain() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        let colon = hex_encode(&bytes, HexMode::LowerColon);
        let plain = hex_encode(&bytes, HexMode::Lower);
        assert_eq!(colon.replace(':', ""), plain);
    }

    #[test]
    fn duration_shorthands() {
        assert_eq!(parse_duration("1y").unwrap(), Duration::from_secs(365 * 24 * 3600));
        assert_eq!(parse_duration("6m").unwrap(), Duration::from_secs(6 * 30 * 24 * 3600));
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(30 * 24 * 3600));
        assert_eq!(parse_duration("4s").unwrap(), Duration::from_secs(4));
        assert_eq!(parse_duration("4S").unwrap(), Duration::from_secs(4));
    }

    #[test]
    fn duration_std_fallback() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn duration_empty_is_error() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
    }

    #[test]
    fn duration_garbage_is_error() {
        assert!(parse_duration("banana").is_err());
    }

    proptest! {
        /// Property: hex round-trips through every mode for arbitrary bytes.
        #[test]
        fn prop_hex_round_trips(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            for mode in [HexMode::Lower, HexMode::Upper, HexMode::LowerColon, HexMode::UpperColon] {
                let encoded = hex_encode(&bytes, mode);
                let plain = encoded.replace(':', "");
                let decoded = hex::decode(&plain).unwrap();
                prop_assert_eq!(decoded, bytes.clone());
            }
        }

        /// Property: every named shorthand parses to its unit times the count,
        /// in seconds, regardless of which unit or magnitude is chosen.
        #[test]
        fn prop_shorthand_duration_matches_unit_seconds(n in 0u64..100_000, unit in prop::sample::select(vec!['y', 'm', 'd', 's'])) {
            let unit_secs: u64 = match unit {
                'y' => 365 * 24 * 3600,
                'm' => 30 * 24 * 3600,
                'd' => 24 * 3600,
                's' => 1,
                _ => unreachable!(),
            };
            let input = format!("{n}{unit}");
            prop_assert_eq!(parse_duration(&input).unwrap(), Duration::from_secs(n * unit_secs));
        }
    }
}
