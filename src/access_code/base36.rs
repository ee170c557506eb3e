//! Fixed-width base-36 fields.

/// Digits used for both the expiry field and the random fragment.
pub const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encode `value` left-padded with `'0'` to `width` characters.
///
/// Returns `None` when the value needs more than `width` digits.
pub fn encode_fixed(mut value: u64, width: usize) -> Option<String> {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    if value != 0 {
        return None;
    }
    String::from_utf8(digits).ok()
}

/// Strict decode: every character must be a base-36 digit (either case).
/// Signs, whitespace and empty input are rejected.
pub fn decode(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    u64::from_str_radix(field, 36).ok()
}
