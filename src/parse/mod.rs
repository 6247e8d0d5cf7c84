//! Low level input handling: the buffered read window and the character
//! classes the lexer is built on.

pub(crate) mod buf;


/// Whitespace that can separate tokens within a line.
#[inline(always)]
pub(crate) fn is_inline_space(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\r'
}

#[inline(always)]
pub(crate) fn is_keyword_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

#[inline(always)]
pub(crate) fn is_keyword_part(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Whether a byte at the end of the read window guarantees that no token
/// straddles the window edge. Whitespace and control bytes can never be part
/// of a token, and neither can anything ≥ 127.
#[inline(always)]
pub(crate) fn is_safe_buffer_end(b: u8) -> bool {
    (b > 0 && b <= 32) || b >= 127
}
