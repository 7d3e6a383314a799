// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mobile number formatting and E.164 normalization.

use crate::error::AppError;

/// Longest domestic mobile number (e.g. `010 1234 5678`).
pub const MAX_DOMESTIC_DIGITS: usize = 11;
/// Shortest number accepted for a verification request.
pub const MIN_DIGITS: usize = 10;

pub const INVALID_NUMBER_MESSAGE: &str = "Please enter a valid mobile number.";

/// Keep only ASCII digits.
pub fn digits_only(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

/// Group digits 3-4-4 for display, dropping anything past 11 digits.
///
/// Idempotent: formatting already-formatted input returns it unchanged.
pub fn format_display(input: &str) -> String {
    let digits: String = digits_only(input)
        .chars()
        .take(MAX_DOMESTIC_DIGITS)
        .collect();

    // Digits are ASCII, so byte offsets are char offsets.
    let groups = [(0, 3), (3, 7), (7, MAX_DOMESTIC_DIGITS)];
    groups
        .iter()
        .filter_map(|&(start, end)| {
            let end = end.min(digits.len());
            (start < end).then(|| &digits[start..end])
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert user input to E.164 with the given country calling code.
///
/// A leading trunk prefix `0` is replaced by the country code; input that
/// already starts with the country code only gains a `+`; anything else is
/// assumed domestic.
pub fn to_e164(input: &str, country_code: &str) -> Result<String, AppError> {
    let digits = digits_only(input);
    if digits.len() < MIN_DIGITS {
        return Err(AppError::Validation(INVALID_NUMBER_MESSAGE.to_string()));
    }

    if let Some(rest) = digits.strip_prefix('0') {
        return Ok(format!("+{}{}", country_code, rest));
    }
    if digits.starts_with(country_code) {
        return Ok(format!("+{}", digits));
    }
    Ok(format!("+{}{}", country_code, digits))
}
