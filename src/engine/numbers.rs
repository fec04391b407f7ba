//! Payment-number extraction and negotiation band classification.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// First run of 2-5 consecutive digits, after commas are stripped.
fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{2,5})").unwrap())
}

/// Pull the first plausible payment number out of free text.
///
/// Commas are stripped first so "1,250" reads as 1250. There is no semantic
/// validation: a 5-digit VIN fragment or phone-number chunk matches too.
/// That is an accepted heuristic, not something this layer tries to fix.
pub fn extract_int(text: &str) -> Option<i64> {
    let cleaned = text.replace(',', "");
    number_re()
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// How far the current offer sits from the customer's stated target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    /// On or under target.
    A,
    /// Slightly over: +1 to +40.
    B,
    /// Far apart: more than +40.
    C,
}

impl Band {
    pub fn as_str(self) -> &'static str {
        match self {
            Band::A => "A",
            Band::B => "B",
            Band::C => "C",
        }
    }
}

/// Render an optional band the way the logs and state snapshot expect.
pub fn band_str(band: Option<Band>) -> &'static str {
    band.map(Band::as_str).unwrap_or("")
}

/// Classify the (target, offer) pair. Pure function; `None` when either side
/// is missing. A delta of exactly 0 is Band A, not B. Units are implicitly
/// monthly-payment dollars.
pub fn compute_band(target: Option<i64>, offer: Option<i64>) -> Option<Band> {
    let (target, offer) = (target?, offer?);
    let delta = offer - target;
    if delta <= 0 {
        Some(Band::A)
    } else if delta <= 40 {
        Some(Band::B)
    } else {
        Some(Band::C)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_two_to_five_digit_run() {
        assert_eq!(extract_int("we're at $480 a month"), Some(480));
        assert_eq!(extract_int("under 450"), Some(450));
        assert_eq!(extract_int("1,250 out the door"), Some(1250));
        assert_eq!(extract_int("call me at 99 then 12345"), Some(99));
    }

    #[test]
    fn single_digits_and_no_digits_miss() {
        assert_eq!(extract_int("give me a 5"), None);
        assert_eq!(extract_int("no numbers here"), None);
    }

    #[test]
    fn six_digit_run_yields_its_five_digit_prefix() {
        // The regex takes the first 5 digits of a longer run. Known quirk of
        // the heuristic, kept as-is.
        assert_eq!(extract_int("123456"), Some(12345));
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(compute_band(Some(450), Some(450)), Some(Band::A));
        assert_eq!(compute_band(Some(450), Some(400)), Some(Band::A));
        assert_eq!(compute_band(Some(450), Some(451)), Some(Band::B));
        assert_eq!(compute_band(Some(450), Some(490)), Some(Band::B));
        assert_eq!(compute_band(Some(450), Some(491)), Some(Band::C));
    }

    #[test]
    fn band_requires_both_sides() {
        assert_eq!(compute_band(None, Some(480)), None);
        assert_eq!(compute_band(Some(450), None), None);
        assert_eq!(compute_band(None, None), None);
        assert_eq!(band_str(None), "");
        assert_eq!(band_str(Some(Band::B)), "B");
    }
}
