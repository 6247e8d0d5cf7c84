use std::{
    fmt,
    io::{self, Read, Seek, SeekFrom},
};

use static_assertions::const_assert;

use crate::error::Error;
use super::{is_inline_space, is_keyword_part, is_keyword_start, is_safe_buffer_end};


/// Size of the read window. All file access goes through a window of this
/// size; it is allocated once per reader and reused for every read.
pub(crate) const READ_BUFFER_SIZE: usize = 128 * 1024;

// Offsets into list data are stored as `u32`.
const_assert!(READ_BUFFER_SIZE <= u32::max_value() as usize);

/// How refills treat the end of the window.
///
/// While tokens are being lexed (the header, and the whole body of ASCII
/// files) the window must never end in the middle of a token, so refills
/// rewind to the last "safe" byte. Binary bodies are consumed in exactly
/// sized pieces and need no such adjustment.
#[derive(Clone, Copy, PartialEq, Eq)]
enum WindowMode {
    Tokens,
    Raw,
}

/// A fixed-size read window over the underlying reader, with the lexer
/// primitives the header parser and the ASCII body loader are built from.
///
/// The window holds two cursors: `pos` marks the start of the token that is
/// currently being matched and `end` marks one past its end. Speculative
/// matches ([`match_tag`][Buffer::match_tag], [`keyword`][Buffer::keyword],
/// the literal scanners) only move `end`; the token is consumed by the next
/// [`accept`][Buffer::accept]/[`advance`][Buffer::advance] style call, which
/// moves `pos` up to `end`.
pub(crate) struct Buffer<R> {
    inner: R,
    buf: Box<[u8]>,

    /// Start of the current token. Invariant: `pos <= end <= data_end`.
    pos: usize,

    /// One past the end of the current token.
    end: usize,

    /// Logical end of readable data in `buf`.
    data_end: usize,

    /// Physical end of the bytes fetched from the file. This only differs
    /// from `data_end` after a safe-char rewind, which hides the tail of the
    /// window until the next refill re-exposes it.
    phys_end: usize,

    /// Absolute file offset of `buf[0]`.
    base_offset: u64,

    at_eof: bool,
    mode: WindowMode,
}

impl<R: Read + Seek> Buffer<R> {
    pub(crate) fn new(inner: R) -> Result<Self, Error> {
        let mut out = Self {
            inner,
            buf: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            end: 0,
            data_end: 0,
            phys_end: 0,
            base_offset: 0,
            at_eof: false,
            mode: WindowMode::Tokens,
        };

        out.refill()?;
        Ok(out)
    }

    /// The absolute file offset of the current position. Only used to give
    /// errors a location.
    pub(crate) fn offset(&self) -> u64 {
        self.base_offset + self.pos as u64
    }

    /// Switches refills to raw mode. Called once the header is done and the
    /// body is known to be binary.
    pub(crate) fn set_raw_mode(&mut self) {
        self.mode = WindowMode::Raw;
    }

    #[inline(always)]
    fn byte_at(&self, i: usize) -> u8 {
        if i < self.data_end {
            self.buf[i]
        } else {
            0
        }
    }

    // =======================================================================
    // ===== Refilling
    // =======================================================================

    /// Discards everything before the current token, moves the tail of the
    /// window to the front and fills the rest from the file. Returns `false`
    /// if no new data could be made available.
    pub(crate) fn refill(&mut self) -> Result<bool, Error> {
        if self.at_eof {
            return Ok(false);
        }

        debug_assert!(self.end >= self.pos);

        // Bytes hidden by a previous safe-char rewind are re-exposed here,
        // which is what makes the rewind purely virtual.
        let keep = self.phys_end - self.pos;
        if keep == self.buf.len() {
            // The current token spans the whole window.
            return Ok(false);
        }
        self.buf.copy_within(self.pos..self.phys_end, 0);
        self.base_offset += self.pos as u64;
        self.end -= self.pos;
        self.pos = 0;

        let mut filled = keep;
        while filled < self.buf.len() {
            match self.inner.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.at_eof = filled < self.buf.len();
        self.phys_end = filled;
        self.data_end = filled;

        if self.mode == WindowMode::Tokens {
            return Ok(self.rewind_to_safe_char());
        }
        Ok(true)
    }

    /// If the window might end in the middle of a token, move the logical end
    /// back to just past the last safe byte so the next refill picks up the
    /// whole token. A trailing `\n` counts as unsafe: consuming it must leave
    /// the following token fully visible, otherwise `next_line` could not
    /// check for a `comment` line without refilling mid-check.
    fn rewind_to_safe_char(&mut self) -> bool {
        if self.at_eof {
            return true;
        }

        let last = self.buf[self.data_end - 1];
        if last != b'\n' && is_safe_buffer_end(last) {
            return true;
        }

        let mut i = self.data_end.saturating_sub(2);
        loop {
            if i < self.end {
                // No safe place to rewind to in the whole window.
                return false;
            }
            let b = self.buf[i];
            if b != b'\n' && is_safe_buffer_end(b) {
                break;
            }
            if i == 0 {
                return false;
            }
            i -= 1;
        }
        self.data_end = i + 1;
        true
    }

    // =======================================================================
    // ===== Token-level primitives
    // =======================================================================

    /// Consumes the current token.
    pub(crate) fn accept(&mut self) {
        self.pos = self.end;
    }

    /// Consumes the current token and skips any spaces, tabs and carriage
    /// returns that follow, refilling as needed. Stops in front of the next
    /// token (or a linebreak). Fails with `UnexpectedEof` if the input ends.
    pub(crate) fn advance(&mut self) -> Result<(), Error> {
        self.pos = self.end;
        loop {
            while self.pos < self.data_end && is_inline_space(self.buf[self.pos]) {
                self.pos += 1;
            }
            if self.pos == self.data_end {
                self.end = self.pos;
                if self.refill()? {
                    continue;
                }
                return Err(Error::UnexpectedEof);
            }
            break;
        }
        self.end = self.pos;
        Ok(())
    }

    /// Consumes everything up to and including the next `\n`. Lines starting
    /// with `comment` are skipped as well, so callers never see them.
    pub(crate) fn next_line(&mut self) -> Result<(), Error> {
        self.pos = self.end;
        loop {
            while self.byte_at(self.pos) != b'\n' {
                if self.pos == self.data_end {
                    self.end = self.pos;
                    if self.refill()? {
                        continue;
                    }
                    return Err(Error::UnexpectedEof);
                }
                self.pos += 1;
            }
            self.pos += 1;
            self.end = self.pos;
            if !self.match_tag(b"comment") {
                return Ok(());
            }
        }
    }

    /// Speculatively matches the literal `tag` at the current position. On
    /// success the token end is placed past it; the position is unchanged.
    pub(crate) fn match_tag(&mut self, tag: &[u8]) -> bool {
        if self.data_end - self.pos < tag.len() {
            return false;
        }
        if &self.buf[self.pos..self.pos + tag.len()] != tag {
            return false;
        }
        self.end = self.pos + tag.len();
        true
    }

    /// Like [`match_tag`][Buffer::match_tag], but additionally requires that
    /// the keyword is not followed by another identifier character (so
    /// `int` does not match the start of `int8`).
    pub(crate) fn keyword(&mut self, kw: &[u8]) -> bool {
        self.match_tag(kw) && !is_keyword_part(self.byte_at(self.end))
    }

    /// Scans an identifier (letter or underscore, then letters, digits and
    /// underscores) of at most `max_len` bytes.
    pub(crate) fn identifier(&mut self, max_len: usize) -> Option<String> {
        let mut i = self.pos;
        if !is_keyword_start(self.byte_at(i)) {
            return None;
        }
        i += 1;
        while is_keyword_part(self.byte_at(i)) {
            i += 1;
        }
        if i - self.pos > max_len {
            return None;
        }
        self.end = i;
        Some(String::from_utf8_lossy(&self.buf[self.pos..i]).into_owned())
    }

    /// Scans a decimal integer literal with optional sign. Literals with more
    /// than 10 significant digits are rejected, as is a trailing letter or
    /// underscore.
    pub(crate) fn int_literal(&mut self) -> Option<i32> {
        let mut i = self.pos;
        let mut negative = false;
        match self.byte_at(i) {
            b'-' => {
                negative = true;
                i += 1;
            }
            b'+' => i += 1,
            _ => {}
        }

        let has_leading_zeroes = self.byte_at(i) == b'0';
        while self.byte_at(i) == b'0' {
            i += 1;
        }

        let mut num_digits = 0;
        let mut val: i64 = 0;
        while self.byte_at(i).is_ascii_digit() {
            val = val * 10 + i64::from(self.byte_at(i) - b'0');
            num_digits += 1;
            i += 1;
        }

        if num_digits == 0 && has_leading_zeroes {
            num_digits = 1;
        }
        let after = self.byte_at(i);
        if num_digits == 0 || num_digits > 10 || after.is_ascii_alphabetic() || after == b'_' {
            return None;
        }

        self.end = i;
        Some(if negative { -val } else { val } as i32)
    }

    /// Scans a floating point literal: optional sign, integer digits,
    /// optional fraction, optional signed exponent. At least one digit is
    /// required around the decimal point.
    pub(crate) fn double_literal(&mut self) -> Option<f64> {
        let mut i = self.pos;
        let mut negative = false;
        match self.byte_at(i) {
            b'-' => {
                negative = true;
                i += 1;
            }
            b'+' => i += 1,
            _ => {}
        }

        let mut val = 0.0f64;

        let has_int_digits = self.byte_at(i).is_ascii_digit();
        if has_int_digits {
            while self.byte_at(i).is_ascii_digit() {
                val = val * 10.0 + f64::from(self.byte_at(i) - b'0');
                i += 1;
            }
        } else if self.byte_at(i) != b'.' {
            return None;
        }

        if self.byte_at(i) == b'.' {
            i += 1;
            let has_frac_digits = self.byte_at(i).is_ascii_digit();
            if has_frac_digits {
                let mut scale = 0.1;
                while self.byte_at(i).is_ascii_digit() {
                    val += scale * f64::from(self.byte_at(i) - b'0');
                    scale *= 0.1;
                    i += 1;
                }
            } else if !has_int_digits {
                return None;
            }
        }

        if self.byte_at(i) == b'e' || self.byte_at(i) == b'E' {
            i += 1;
            let mut negative_exponent = false;
            match self.byte_at(i) {
                b'-' => {
                    negative_exponent = true;
                    i += 1;
                }
                b'+' => i += 1,
                _ => {}
            }
            if !self.byte_at(i).is_ascii_digit() {
                return None;
            }
            let mut exponent = 0.0f64;
            while self.byte_at(i).is_ascii_digit() {
                exponent = exponent * 10.0 + f64::from(self.byte_at(i) - b'0');
                i += 1;
            }
            if negative_exponent {
                exponent = -exponent;
            }
            val *= 10.0f64.powf(exponent);
        }

        let after = self.byte_at(i);
        if after == b'.' || after == b'_' || after.is_ascii_alphanumeric() {
            return None;
        }

        self.end = i;
        Some(if negative { -val } else { val })
    }

    pub(crate) fn float_literal(&mut self) -> Option<f32> {
        self.double_literal().map(|v| v as f32)
    }

    // =======================================================================
    // ===== Byte-level primitives (binary bodies)
    // =======================================================================

    /// Makes at least `num_bytes` available at the current position,
    /// refilling from the file if needed. Returns `false` if that many bytes
    /// are not reachable. `num_bytes` must not exceed the window size.
    pub(crate) fn ensure(&mut self, num_bytes: usize) -> Result<bool, Error> {
        if self.data_end - self.pos >= num_bytes {
            return Ok(true);
        }
        if !self.refill()? {
            return Ok(false);
        }
        Ok(self.data_end - self.pos >= num_bytes)
    }

    /// The first `num_bytes` bytes at the current position. Call
    /// [`ensure`][Buffer::ensure] first.
    pub(crate) fn bytes(&self, num_bytes: usize) -> &[u8] {
        &self.buf[self.pos..self.pos + num_bytes]
    }

    /// Everything that is currently available without touching the file.
    pub(crate) fn available(&self) -> &[u8] {
        &self.buf[self.pos..self.data_end]
    }

    /// Consumes `num_bytes` already-available bytes.
    pub(crate) fn consume(&mut self, num_bytes: usize) {
        debug_assert!(self.pos + num_bytes <= self.data_end);
        self.pos += num_bytes;
        self.end = self.pos;
    }

    /// Consumes `num_bytes`, refilling as often as needed. Unlike
    /// [`ensure`][Buffer::ensure] this can move past more data than fits in
    /// the window. Fails if the file ends first.
    pub(crate) fn advance_bytes(&mut self, num_bytes: usize) -> Result<(), Error> {
        let mut remaining = num_bytes;
        loop {
            let avail = self.data_end - self.pos;
            if remaining <= avail {
                self.pos += remaining;
                self.end = self.pos;
                return Ok(());
            }
            remaining -= avail;
            self.pos = self.data_end;
            self.end = self.pos;
            if !self.refill()? {
                return Err(Error::UnexpectedEof);
            }
        }
    }

    /// Skips `num_bytes` of body data. When the target lies beyond the
    /// window the underlying reader is seeked directly, so this is cheap even
    /// for elements much larger than the window.
    pub(crate) fn seek_forward(&mut self, num_bytes: u64) -> Result<(), Error> {
        let in_window = (self.data_end - self.pos) as u64;
        if num_bytes <= in_window {
            self.pos += num_bytes as usize;
            self.end = self.pos;
            return Ok(());
        }

        let target = self.base_offset + self.pos as u64 + num_bytes;
        self.inner.seek(SeekFrom::Start(target))?;
        self.base_offset = target;
        self.pos = 0;
        self.end = 0;
        self.data_end = 0;
        self.phys_end = 0;
        self.at_eof = false;
        self.refill()?;
        Ok(())
    }
}

impl<R> fmt::Debug for Buffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Buffer {{ offset: {}, window: {}..{}, at_eof: {} }}",
            self.base_offset, self.pos, self.data_end, self.at_eof,
        )
    }
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn buf(data: &str) -> Buffer<Cursor<Vec<u8>>> {
        Buffer::new(Cursor::new(data.as_bytes().to_vec())).unwrap()
    }

    #[test]
    fn keywords_respect_boundaries() {
        let mut b = buf("int8 x");
        assert!(!b.keyword(b"int"));
        assert!(b.keyword(b"int8"));
    }

    #[test]
    fn int_literals() {
        assert_eq!(buf("42 ").int_literal(), Some(42));
        assert_eq!(buf("-17\n").int_literal(), Some(-17));
        assert_eq!(buf("+3 ").int_literal(), Some(3));
        assert_eq!(buf("007 ").int_literal(), Some(7));
        assert_eq!(buf("0 ").int_literal(), Some(0));
        assert_eq!(buf("12ab").int_literal(), None);
        assert_eq!(buf("12_").int_literal(), None);
        assert_eq!(buf("- ").int_literal(), None);
        assert_eq!(buf("99999999999 ").int_literal(), None); // 11 digits
    }

    #[test]
    fn double_literals() {
        assert_eq!(buf("1.5 ").double_literal(), Some(1.5));
        assert_eq!(buf("-0.25 ").double_literal(), Some(-0.25));
        assert_eq!(buf(".5 ").double_literal(), Some(0.5));
        assert_eq!(buf("2. ").double_literal(), Some(2.0));
        assert_eq!(buf("1e3 ").double_literal(), Some(1000.0));
        let v = buf("1.5e-2 ").double_literal().unwrap();
        assert!((v - 0.015).abs() < 1e-12);
        assert_eq!(buf(". ").double_literal(), None);
        assert_eq!(buf("1.2.3 ").double_literal(), None);
        assert_eq!(buf("1.5x ").double_literal(), None);
        assert_eq!(buf("1e ").double_literal(), None);
    }

    #[test]
    fn identifiers() {
        assert_eq!(buf("vertex_indices ").identifier(255).as_deref(), Some("vertex_indices"));
        assert_eq!(buf("_x9 ").identifier(255).as_deref(), Some("_x9"));
        assert_eq!(buf("9x ").identifier(255), None);
        assert_eq!(buf("abcdef ").identifier(3), None);
    }

    #[test]
    fn next_line_skips_comments() {
        let mut b = buf("first\ncomment one\ncomment two\nsecond\n");
        b.next_line().unwrap();
        assert!(b.keyword(b"second"));
    }

    #[test]
    fn advance_stops_at_linebreak() {
        let mut b = buf("a  \t b\nc");
        assert!(b.keyword(b"a"));
        b.advance().unwrap();
        assert!(b.keyword(b"b"));
        b.advance().unwrap();
        assert!(!b.keyword(b"c"));
        b.next_line().unwrap();
        assert!(b.keyword(b"c"));
    }

    #[test]
    fn advance_bytes_and_seek() {
        let data: Vec<u8> = (0..1000u32).flat_map(|i| i.to_le_bytes().to_vec()).collect();
        let mut b = Buffer::new(Cursor::new(data)).unwrap();
        b.set_raw_mode();
        b.advance_bytes(4 * 500).unwrap();
        assert!(b.ensure(4).unwrap());
        assert_eq!(b.bytes(4), &500u32.to_le_bytes());
        b.seek_forward(4 * 499).unwrap();
        assert!(b.ensure(4).unwrap());
        assert_eq!(b.bytes(4), &999u32.to_le_bytes());
    }
}
