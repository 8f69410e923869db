//! Byte-class predicates for HTTP/1.1 grammar, RFC 9110 Section 5.6.2.

/// `tchar` per RFC 9110 5.6.2: valid in method and header-name tokens.
#[inline]
pub fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

/// Valid byte within a request-target, RFC 9112 3.2 (approximated as visible
/// ASCII excluding control characters and whitespace).
#[inline]
pub fn is_request_target_token(b: u8) -> bool {
    b > 0x20 && b != 0x7f
}

/// Valid byte within a header field value, RFC 9110 5.5 (`field-vchar` plus
/// interior whitespace).
#[inline]
pub fn is_header_value_token(b: u8) -> bool {
    b == b' ' || b == b'\t' || (0x21..=0xff).contains(&b) && b != 0x7f
}
