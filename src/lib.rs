//! A small and fast streaming reader for the PLY file format.
//!
//! PLY is a popular and flexible file format for meshes and point clouds. A
//! short ASCII header describes a sequence of *elements* (usually `vertex`
//! and `face`); each element is a sequence of rows and each row is a tuple of
//! *properties*. A property is either a scalar of one of eight primitive
//! types, or a list (an integer count followed by that many values). The body
//! is encoded as ASCII or as binary with either endianness.
//!
//! This crate only reads PLY files. It does so one element at a time: after
//! the header is parsed you walk over the elements with a cursor, decide per
//! element whether to load its payload, and pull typed columns out of the
//! loaded element. Elements you don't load are skipped without retaining any
//! of their data, so peak memory is bounded by the largest single element,
//! not by the file.
//!
//! ### Links:
//! - ["Specification"](http://paulbourke.net/dataformats/ply/)
//! - [Wikipedia](https://en.wikipedia.org/wiki/PLY_(file_format))
//!
//!
//! # Reading
//!
//! Create a [`Reader`] with [`Reader::open`] (or [`Reader::new`] for any
//! `Read + Seek` source). This parses the header; a malformed header is an
//! error right away. Then drive the element cursor:
//!
//! ```no_run
//! use ply_lite::Reader;
//!
//! # fn run() -> Result<(), ply_lite::Error> {
//! let mut reader = Reader::open("bunny.ply")?;
//! let mut positions = Vec::new();
//! while reader.has_element() {
//!     if reader.element_is("vertex") {
//!         reader.load_element()?;
//!         positions = vec![0.0f32; reader.num_rows() as usize * 3];
//!         reader.extract_scalar_tuple(&["x", "y", "z"], &mut positions)?;
//!     }
//!     reader.next_element()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Faces stored as polygon lists can be turned into a triangle index buffer
//! with [`Reader::extract_triangles`], which ear-clips any non-triangle
//! polygons, or -- when all faces are known to be triangles -- loaded through
//! the fastest path by calling [`Reader::convert_list_to_fixed_size`] before
//! [`Reader::load_element`].

use std::fmt;

mod error;
mod parse;
mod read;
mod triangulate;

pub mod raw;


pub use self::error::Error;
pub use self::raw::{ElementDef, FromScalar, PropIndex, PropertyDef, ScalarType};
pub use self::read::Reader;
pub use self::triangulate::triangulate_polygon;


// ----------------------------------------------------------------------------

/// The encoding of a PLY file body. The header is always ASCII.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// All values are stored as whitespace separated ASCII literals, one row
    /// per line.
    Ascii,

    /// Binary encoding with all numeric types in big endian layout.
    BinaryBigEndian,

    /// Binary encoding with all numeric types in little endian layout.
    BinaryLittleEndian,
}

impl Encoding {
    /// Returns the binary encoding with native endianness (little endian on
    /// x86).
    pub fn binary_native() -> Self {
        if cfg!(target_endian = "big") {
            Encoding::BinaryBigEndian
        } else {
            Encoding::BinaryLittleEndian
        }
    }

    /// The keyword used for this encoding in `format` lines.
    pub fn keyword(&self) -> &'static str {
        match self {
            Encoding::Ascii => "ascii",
            Encoding::BinaryBigEndian => "binary_big_endian",
            Encoding::BinaryLittleEndian => "binary_little_endian",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.keyword())
    }
}
