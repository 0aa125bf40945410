use chrono::NaiveDate;

use crate::error::CastError;

/// Parse a build year field. Anything that is not a plain integer fails the
/// cast and counts as out of range.
pub fn parse_build_year(raw: &str) -> Option<i32> {
    raw.trim().parse().ok()
}

/// Fast parse of `"YYYY-MM-DD"` or `"YYYY/MM/DD"` (optionally followed by a
/// time component) → the year. Rejects impossible calendar dates.
pub fn parse_firstuse_year(raw: &str) -> Option<i32> {
    let s = raw.trim();
    if s.len() < 10 {
        return None;
    }
    let sep = &s[4..5];
    if (sep != "-" && sep != "/") || &s[7..8] != sep {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[5..7].parse().ok()?;
    let day: u32 = s[8..10].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?;
    Some(year)
}

/// Parse a damage amount into cents, fixed point with two fractional digits.
/// Fractions beyond two digits round half-up.
pub fn parse_damage_cents(raw: &str) -> Result<i64, CastError> {
    let err = || CastError {
        field: "amount_damage",
        value: raw.to_string(),
    };

    let s = raw.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }

    let units: i64 = int_part.parse().map_err(|_| err())?;
    let cents = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().map_err(|_| err())? * 10,
        2 => frac_part.parse::<i64>().map_err(|_| err())?,
        n => {
            let frac: i64 = frac_part.parse().map_err(|_| err())?;
            let divisor = 10_i64.pow(n as u32 - 2);
            (frac + divisor / 2) / divisor
        }
    };
    Ok(sign * (units * 100 + cents))
}
