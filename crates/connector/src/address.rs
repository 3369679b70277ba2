//! Wire-address helpers for the chat network.
//!
//! The network addresses individual contacts as `{digits}@c.us`. Callers
//! hand us phone-number-shaped strings; contacts come back off the wire with
//! the suffix attached.

/// Suffix the network uses for individual contact addresses.
pub const CONTACT_SUFFIX: &str = "@c.us";

/// Normalize a recipient into wire form: strip everything but digits, then
/// attach the contact suffix. Already-normalized addresses pass through.
#[must_use]
pub fn to_wire(recipient: &str) -> String {
    if recipient.contains('@') {
        return recipient.to_string();
    }
    let digits: String = recipient.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}{CONTACT_SUFFIX}")
}

/// Derive the contact address we key conversations by from a sender's wire
/// address: digits with a leading `+`.
#[must_use]
pub fn contact_from_wire(sender: &str) -> String {
    let bare = sender.split('@').next().unwrap_or(sender);
    let digits: String = bare.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        bare.to_string()
    } else {
        format!("+{digits}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_wire_strips_formatting() {
        assert_eq!(to_wire("+1 (555) 000-1111"), "15550001111@c.us");
        assert_eq!(to_wire("15550001111"), "15550001111@c.us");
    }

    #[test]
    fn to_wire_passes_through_wire_addresses() {
        assert_eq!(to_wire("15550001111@c.us"), "15550001111@c.us");
    }

    #[test]
    fn contact_from_wire_prefixes_plus() {
        assert_eq!(contact_from_wire("15550001111@c.us"), "+15550001111");
    }

    #[test]
    fn contact_from_wire_without_digits_keeps_identifier() {
        assert_eq!(contact_from_wire("broadcast@g.us"), "broadcast");
    }
}
