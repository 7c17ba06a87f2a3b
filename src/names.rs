//! Validation of the dotted names used in message headers.

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 255;

fn is_element(element: &str, allow_dash: bool, allow_leading_digit: bool) -> bool {
    let mut chars = element.chars();
    match chars.next() {
        None => return false,
        Some(c) if c.is_ascii_digit() && !allow_leading_digit => return false,
        _ => (),
    }
    element
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-'))
}

fn is_dotted(name: &str, allow_dash: bool, allow_leading_digit: bool) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let mut count = 0;
    for element in name.split('.') {
        if !is_element(element, allow_dash, allow_leading_digit) {
            return false;
        }
        count += 1;
    }
    count >= 2
}

pub fn is_valid_interface_name(name: &str) -> bool {
    is_dotted(name, false, false)
}

/// Error names follow the interface name grammar.
pub fn is_valid_error_name(name: &str) -> bool {
    is_valid_interface_name(name)
}

pub fn is_valid_member_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && is_element(name, false, false)
}

pub fn is_valid_bus_name(name: &str) -> bool {
    match name.strip_prefix(':') {
        Some(unique) => unique.len() < MAX_NAME_LEN && is_dotted(unique, true, true),
        None => is_dotted(name, true, false),
    }
}

pub(crate) fn check(kind: &'static str, name: &str, valid: fn(&str) -> bool) -> Result<()> {
    if valid(name) {
        Ok(())
    } else {
        Err(Error::InvalidName {
            kind,
            name: name.to_owned(),
        })
    }
}
