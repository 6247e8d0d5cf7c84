use std::io;

use failure::Fail;


/// The error type for everything that can go wrong while reading a PLY file.
///
/// Errors reported while parsing carry the absolute byte offset in the input
/// at which the problem was noticed.
#[derive(Debug, Fail)]
pub enum Error {
    /// An error from the underlying reader.
    #[fail(display = "IO error: {}", _0)]
    Io(io::Error),

    /// The input ended in the middle of something.
    #[fail(display = "unexpected end of file while parsing")]
    UnexpectedEof,

    /// The header does not conform to the PLY grammar.
    #[fail(display = "invalid PLY header: {} (near byte {})", _0, _1)]
    InvalidHeader(String, u64),

    /// The body data does not match what the header promised (e.g. a negative
    /// list count or a truncated element payload).
    #[fail(display = "invalid PLY data: {} (near byte {})", _0, _1)]
    InvalidData(String, u64),

    /// An extraction call that does not fit the loaded element, e.g. a
    /// missing property name or a destination buffer that is too small.
    ///
    /// Unlike the other variants, this does not invalidate the reader.
    #[fail(display = "{}", _0)]
    InvalidOperation(String),
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Self {
        if src.kind() == io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::Io(src)
        }
    }
}
