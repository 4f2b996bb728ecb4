//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

/// Validate a Chilean RUT, with or without thousands separators
///
/// Accepts `12.345.678-5` and `12345678-5`; the check digit may be `K`.
pub fn validate_rut(rut: &str) -> Result<(), String> {
    if rut.is_empty() {
        return Err("RUT is required".to_string());
    }

    static RUT_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = RUT_REGEX.get_or_init(|| {
        Regex::new(r"^(\d{1,3}(?:\.\d{3}){0,2}|\d{1,8})-([\dkK])$")
            .expect("Failed to compile RUT regex")
    });

    let captures = regex
        .captures(rut)
        .ok_or_else(|| "RUT must look like 12.345.678-5".to_string())?;

    let body: String = captures[1].chars().filter(|c| c.is_ascii_digit()).collect();
    let given = captures[2].to_ascii_uppercase();

    if check_digit(&body) != given {
        return Err("RUT check digit does not match".to_string());
    }

    Ok(())
}

/// Modulo-11 check digit of the numeric part of a RUT
fn check_digit(body: &str) -> String {
    let sum: u32 = body
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .zip([2, 3, 4, 5, 6, 7].iter().cycle())
        .map(|(digit, factor)| digit * factor)
        .sum();

    match 11 - sum % 11 {
        11 => "0".to_string(),
        10 => "K".to_string(),
        d => d.to_string(),
    }
}

/// Validate a free-text label such as a class title or activity
pub fn validate_label(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", field));
    }

    if value.chars().count() > 120 {
        return Err(format!("{} must be at most 120 characters long", field));
    }

    Ok(())
}
