/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Syntax checks for envelope addresses (RFC 5321 `Mailbox`).

const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;
const MAX_LABEL: usize = 63;

/// Returns `true` if `address` is a syntactically valid `local@domain` mailbox.
pub fn is_valid(address: &str) -> bool {
    match address.rsplit_once('@') {
        Some((local, domain)) => is_valid_local_part(local) && is_valid_domain(domain),
        None => false,
    }
}

pub(crate) fn validate(address: &str) -> crate::Result<()> {
    if is_valid(address) {
        Ok(())
    } else {
        Err(crate::Error::InvalidAddress(address.to_string()))
    }
}

fn is_valid_local_part(local: &str) -> bool {
    if local.is_empty() || local.len() > MAX_LOCAL_PART {
        return false;
    }

    if let Some(quoted) = local
        .strip_prefix('"')
        .and_then(|local| local.strip_suffix('"'))
    {
        let mut escaped = false;
        for ch in quoted.chars() {
            if escaped {
                if ch.is_control() {
                    return false;
                }
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' || ch.is_control() {
                return false;
            }
        }
        !escaped
    } else {
        local.split('.').all(|atom| {
            !atom.is_empty()
                && atom.chars().all(|ch| {
                    ch.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(ch) || !ch.is_ascii()
                })
        })
    }
}

fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN {
        return false;
    }

    if let Some(literal) = domain
        .strip_prefix('[')
        .and_then(|domain| domain.strip_suffix(']'))
    {
        !literal.is_empty()
            && literal
                .chars()
                .all(|ch| ch.is_ascii_graphic() && !matches!(ch, '[' | ']' | '\\'))
    } else {
        domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= MAX_LABEL
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || !ch.is_ascii())
        })
    }
}

#[cfg(test)]
mod test {
    use super::is_valid;

    #[test]
    fn valid_addresses() {
        for address in [
            "a@x.com",
            "reader@81-28-6-251.cloud-xip.com",
            "john.doe+tag@example.co.uk",
            "\"john doe\"@example.com",
            "\"a@b\"@example.com",
            "user@[192.0.2.1]",
            "user@localhost",
            "josé@exämple.com",
        ] {
            assert!(is_valid(address), "{address} should be valid");
        }
    }

    #[test]
    fn invalid_addresses() {
        for address in [
            "",
            "plainaddress",
            "@example.com",
            "user@",
            "user@@example.com",
            "user name@example.com",
            "user@exa mple.com",
            ".user@example.com",
            "user.@example.com",
            "us..er@example.com",
            "user@example..com",
            "user@-example.com",
            "user@example-.com",
            "<user@example.com>",
            "user@example.com>",
            "user\r\n@example.com",
            "\"unterminated@example.com",
            "user@[]",
        ] {
            assert!(!is_valid(address), "{address:?} should be invalid");
        }
    }
}
