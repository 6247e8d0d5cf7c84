//! Parsing PLY files.
//!
//! # Random notes on parsing and the file format
//!
//! - The "specification" talks about carriage-return terminated lines, but
//!   every file out there (including the example files linked from the
//!   specification) ends its lines with '\n' (0x0A). So lines end at '\n'
//!   here, and stray '\r' bytes are treated as inline whitespace.
//! - Comment lines are legal anywhere in the header. They are skipped inside
//!   `Buffer::next_line`, so none of the code below ever sees one.

use std::{
    fs::File,
    io::{Read, Seek},
    path::Path,
};

use byteorder::{ByteOrder, NativeEndian};
use smallvec::SmallVec;

use crate::{
    Encoding,
    error::Error,
    parse::buf::Buffer,
    raw::{ElementDef, FromScalar, PropIndex, PropertyDef, ScalarType},
    triangulate::triangulate_polygon,
};


/// Identifiers in the header (element and property names) are limited to
/// this many bytes.
const MAX_IDENTIFIER_LEN: usize = 255;


// ===========================================================================
// ===== Definition of `Reader`
// ===========================================================================

/// A reader able to read ASCII and binary PLY files.
///
/// Create one with [`Reader::open`] or [`Reader::new`]; both parse the
/// header, so a reader in hand always has a valid set of element
/// descriptors. Body data is then pulled element by element:
///
/// - [`has_element`][Reader::has_element] / [`element`][Reader::element]
///   inspect the element the cursor is on,
/// - [`load_element`][Reader::load_element] reads its payload into memory,
/// - the `extract_*` methods pull typed columns out of the loaded payload,
/// - [`next_element`][Reader::next_element] drops the payload and moves on,
///   skipping over the element's bytes if it was never loaded.
///
/// The cursor only ever moves forward; there is no way to revisit an
/// element that has been passed.
#[derive(Debug)]
pub struct Reader<R: Read + Seek> {
    buf: Buffer<R>,
    encoding: Encoding,
    version: (i32, i32),
    elements: Vec<ElementDef>,

    current_element: usize,
    element_loaded: bool,
    /// Payload of the currently loaded element: the fixed-size properties of
    /// all rows, packed in declaration order with `row_stride` bytes per
    /// row. List payloads live in the property descriptors instead.
    element_data: Vec<u8>,

    valid: bool,
}

impl Reader<File> {
    /// Opens the file at the given path and parses its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        // No `BufReader`: all reads go through the internal window anyway.
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> Reader<R> {
    /// Creates a reader from the given source and parses the header.
    ///
    /// `Seek` is required so that unloaded fixed-size binary elements can be
    /// skipped without reading their bytes.
    pub fn new(inner: R) -> Result<Self, Error> {
        let mut buf = Buffer::new(inner)?;

        // ===== Magic number and format line ================================
        if !buf.keyword(b"ply") {
            return Err(header_error(&buf, "not a PLY file (missing \"ply\" magic)"));
        }
        buf.next_line()?;

        if !buf.keyword(b"format") {
            return Err(header_error(&buf, "expected \"format\" line"));
        }
        buf.advance()?;

        let encoding = if buf.keyword(b"ascii") {
            Encoding::Ascii
        } else if buf.keyword(b"binary_little_endian") {
            Encoding::BinaryLittleEndian
        } else if buf.keyword(b"binary_big_endian") {
            Encoding::BinaryBigEndian
        } else {
            return Err(header_error(
                &buf,
                "expected \"ascii\", \"binary_little_endian\" or \"binary_big_endian\"",
            ));
        };
        buf.advance()?;

        let major = match buf.int_literal() {
            Some(v) => v,
            None => return Err(header_error(&buf, "invalid major version number")),
        };
        buf.advance()?;
        if !buf.match_tag(b".") {
            return Err(header_error(&buf, "expected '.' between version numbers"));
        }
        buf.advance()?;
        let minor = match buf.int_literal() {
            Some(v) => v,
            None => return Err(header_error(&buf, "invalid minor version number")),
        };
        buf.next_line()?;

        // ===== Elements and their properties ===============================
        let mut elements = Vec::new();
        while buf.keyword(b"element") {
            elements.push(parse_element(&mut buf)?);
        }

        if !buf.keyword(b"end_header") {
            return Err(header_error(
                &buf,
                "expected \"element\", \"property\" or \"end_header\"",
            ));
        }
        buf.advance()?;
        if !buf.match_tag(b"\n") {
            return Err(header_error(&buf, "expected linebreak after \"end_header\""));
        }
        buf.accept();

        // The body follows. Binary bodies are consumed in exactly sized
        // pieces, so refills no longer need the safe-char rewind. For ASCII
        // bodies, position the cursor on the first value of the first row.
        if encoding == Encoding::Ascii {
            eof_ok(buf.advance())?;
        } else {
            buf.set_raw_mode();
        }

        for elem in &mut elements {
            elem.calc_offsets();
        }

        Ok(Self {
            buf,
            encoding,
            version: (major, minor),
            elements,
            current_element: 0,
            element_loaded: false,
            element_data: Vec::new(),
            valid: true,
        })
    }

    // =======================================================================
    // ===== Observers
    // =======================================================================

    /// Whether the reader is still usable. Header errors surface as `Err`
    /// from [`Reader::new`], so this only turns `false` when loading or
    /// skipping body data fails. Once `false` it stays `false`.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The encoding of this file's body.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn version_major(&self) -> i32 {
        self.version.0
    }

    pub fn version_minor(&self) -> i32 {
        self.version.1
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// The descriptors of all elements in the file, in declaration order.
    pub fn elements(&self) -> &[ElementDef] {
        &self.elements
    }

    pub fn get_element(&self, idx: usize) -> Option<&ElementDef> {
        self.elements.get(idx)
    }

    /// The position of the element with the given name, if any.
    pub fn find_element(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.name == name)
    }

    // =======================================================================
    // ===== The element cursor
    // =======================================================================

    /// Whether the cursor is on an element (i.e. the end of the file has not
    /// been reached and no error occurred).
    pub fn has_element(&self) -> bool {
        self.valid && self.current_element < self.elements.len()
    }

    /// The descriptor of the current element.
    ///
    /// Panics if [`has_element`][Reader::has_element] is `false`.
    pub fn element(&self) -> &ElementDef {
        assert!(self.has_element(), "element cursor is past the end");
        &self.elements[self.current_element]
    }

    /// Whether the current element has the given name.
    pub fn element_is(&self, name: &str) -> bool {
        self.has_element() && self.elements[self.current_element].name == name
    }

    /// The number of rows of the current element.
    pub fn num_rows(&self) -> u32 {
        self.element().count
    }

    /// Reads the current element's payload into memory. A second call on the
    /// same element is a no-op.
    ///
    /// On failure the reader becomes invalid: the read position is somewhere
    /// inside the broken payload and there is no way to resynchronize.
    pub fn load_element(&mut self) -> Result<(), Error> {
        if !self.has_element() {
            return Err(Error::InvalidOperation("no element to load".into()));
        }
        if self.element_loaded {
            return Ok(());
        }

        let elem = &mut self.elements[self.current_element];
        let res = if elem.fixed_size {
            load_fixed_size_element(&mut self.buf, elem, self.encoding, &mut self.element_data)
        } else {
            load_variable_size_element(&mut self.buf, elem, self.encoding, &mut self.element_data)
        };

        match res {
            Ok(()) => {
                self.element_loaded = true;
                Ok(())
            }
            Err(e) => {
                self.valid = false;
                Err(e)
            }
        }
    }

    /// Moves the cursor to the next element. If the current element was
    /// loaded, its buffers are released; otherwise its bytes are skipped in
    /// the file.
    pub fn next_element(&mut self) -> Result<(), Error> {
        if !self.has_element() {
            return Ok(());
        }

        let idx = self.current_element;
        self.current_element += 1;

        if self.element_loaded {
            // A loaded element leaves the read position at the start of the
            // next element, so only the buffers have to go.
            for prop in &mut self.elements[idx].properties {
                prop.release_row_data();
            }
            self.element_data.clear();
            self.element_loaded = false;
            return Ok(());
        }

        match self.skip_element(idx) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.valid = false;
                Err(e)
            }
        }
    }

    /// Moves the read position past the body of the (unloaded) element at
    /// `idx` without retaining any of its data.
    fn skip_element(&mut self, idx: usize) -> Result<(), Error> {
        let elem = &self.elements[idx];
        let buf = &mut self.buf;

        if self.encoding == Encoding::Ascii {
            for _ in 0..elem.count {
                eof_ok(buf.next_line())?;
            }
        } else if elem.fixed_size {
            buf.seek_forward(u64::from(elem.count) * u64::from(elem.row_stride))?;
        } else {
            // Walk the rows, reading only the list counts.
            let swap = self.encoding != Encoding::binary_native();
            for _ in 0..elem.count {
                for prop in &elem.properties {
                    match prop.count_type {
                        None => buf.advance_bytes(prop.ty.size() as usize)?,
                        Some(count_type) => {
                            let count = read_binary_list_count(buf, count_type, swap)?;
                            buf.advance_bytes(count as usize * prop.ty.size() as usize)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Reorganizes the list property `prop` of the element at `element` into
    /// fixed-size columns; see
    /// [`ElementDef::convert_list_to_fixed_size`]. Only allowed for elements
    /// the reader has not started loading yet.
    pub fn convert_list_to_fixed_size(
        &mut self,
        element: usize,
        prop: PropIndex,
        n: u32,
    ) -> Option<Vec<PropIndex>> {
        if element >= self.elements.len()
            || element < self.current_element
            || (element == self.current_element && self.element_loaded)
        {
            return None;
        }
        self.elements[element].convert_list_to_fixed_size(prop, n)
    }

    // =======================================================================
    // ===== Extraction from the loaded element
    // =======================================================================

    fn loaded_element(&self) -> Result<&ElementDef, Error> {
        if !self.element_loaded {
            return Err(Error::InvalidOperation("no element is loaded".into()));
        }
        Ok(&self.elements[self.current_element])
    }

    /// Whether the current element has a property with the given name.
    pub fn has_property(&self, name: &str) -> bool {
        self.has_element() && self.element().find_property(name).is_some()
    }

    /// Whether the current element has all of the given properties.
    pub fn has_scalar_tuple(&self, names: &[&str]) -> bool {
        self.has_element() && {
            let elem = self.element();
            names.iter().all(|n| elem.find_property(n).is_some())
        }
    }

    /// Extracts `names.len()` scalar properties per row, converted to `f32`,
    /// writing one tuple per row to `dst` in row order.
    ///
    /// The common case of contiguous `float` columns (e.g. `x y z`) is a
    /// straight block copy; anything else falls back to per-field
    /// conversion. Fails if a name is missing, names a list property, or
    /// `dst` is too small; the reader itself is unaffected by such failures.
    pub fn extract_scalar_tuple(&self, names: &[&str], dst: &mut [f32]) -> Result<(), Error> {
        let elem = self.loaded_element()?;

        let mut fields: SmallVec<[&PropertyDef; 4]> = SmallVec::new();
        for name in names {
            let idx = elem.find_property(name).ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "element '{}' has no property '{}'",
                    elem.name, name,
                ))
            })?;
            let prop = &elem.properties[idx.as_usize()];
            if prop.is_list() {
                return Err(Error::InvalidOperation(format!(
                    "property '{}' is a list, expected a scalar",
                    name,
                )));
            }
            fields.push(prop);
        }

        let k = fields.len();
        if k == 0 {
            return Ok(());
        }
        let total = elem.count as usize * k;
        if dst.len() < total {
            return Err(Error::InvalidOperation(format!(
                "destination holds {} values but {} are required",
                dst.len(),
                total,
            )));
        }
        let dst = &mut dst[..total];
        let row_stride = elem.row_stride as usize;
        let data = &self.element_data;

        let all_floats = fields.iter().all(|p| p.ty == ScalarType::Float);
        if all_floats {
            let contiguous = fields
                .windows(2)
                .all(|w| w[1].offset == w[0].offset + 4);
            if contiguous {
                if elem.properties.len() == k {
                    // The tuple is the whole row: one single block copy.
                    NativeEndian::read_f32_into(&data[..total * 4], dst);
                } else {
                    // One copy per row.
                    let start = fields[0].offset as usize;
                    for (row, out) in data.chunks_exact(row_stride).zip(dst.chunks_exact_mut(k)) {
                        NativeEndian::read_f32_into(&row[start..start + k * 4], out);
                    }
                }
            } else {
                // All floats, but scattered within the row.
                for (row, out) in data.chunks_exact(row_stride).zip(dst.chunks_exact_mut(k)) {
                    for (field, slot) in fields.iter().zip(out.iter_mut()) {
                        let off = field.offset as usize;
                        *slot = NativeEndian::read_f32(&row[off..off + 4]);
                    }
                }
            }
        } else {
            // Mixed types: per-field conversion.
            for (row, out) in data.chunks_exact(row_stride).zip(dst.chunks_exact_mut(k)) {
                for (field, slot) in fields.iter().zip(out.iter_mut()) {
                    *slot = f32::from_scalar(field.ty, &row[field.offset as usize..]);
                }
            }
        }

        Ok(())
    }

    /// Extracts the scalar properties at `cols`, converted to `T`, one tuple
    /// per row. Like [`extract_scalar_tuple`][Reader::extract_scalar_tuple]
    /// but addressed by index and generic in the destination type, e.g. for
    /// pulling the columns created by
    /// [`convert_list_to_fixed_size`][Reader::convert_list_to_fixed_size]
    /// into an index buffer.
    pub fn extract_scalar_columns<T: FromScalar>(
        &self,
        cols: &[PropIndex],
        dst: &mut [T],
    ) -> Result<(), Error> {
        let elem = self.loaded_element()?;

        let mut fields: SmallVec<[&PropertyDef; 4]> = SmallVec::new();
        for col in cols {
            let prop = elem.properties.get(col.as_usize()).ok_or_else(|| {
                Error::InvalidOperation(format!("property index {} out of range", col.0))
            })?;
            if prop.is_list() {
                return Err(Error::InvalidOperation(format!(
                    "property '{}' is a list, expected a scalar",
                    prop.name,
                )));
            }
            fields.push(prop);
        }

        let k = fields.len();
        if k == 0 {
            return Ok(());
        }
        let total = elem.count as usize * k;
        if dst.len() < total {
            return Err(Error::InvalidOperation(format!(
                "destination holds {} values but {} are required",
                dst.len(),
                total,
            )));
        }

        let row_stride = elem.row_stride as usize;
        let rows = self.element_data.chunks_exact(row_stride);
        for (row, out) in rows.zip(dst[..total].chunks_exact_mut(k)) {
            for (field, slot) in fields.iter().zip(out.iter_mut()) {
                *slot = T::from_scalar(field.ty, &row[field.offset as usize..]);
            }
        }

        Ok(())
    }

    /// Extracts all items of the list property `prop` into a flat array, in
    /// row order, converting each item to `T`.
    pub fn extract_list_as<T: FromScalar>(
        &self,
        prop: PropIndex,
        dst: &mut [T],
    ) -> Result<(), Error> {
        let elem = self.loaded_element()?;
        let p = elem.properties.get(prop.as_usize()).ok_or_else(|| {
            Error::InvalidOperation(format!("property index {} out of range", prop.0))
        })?;
        if !p.is_list() {
            return Err(Error::InvalidOperation(format!(
                "property '{}' is not a list",
                p.name,
            )));
        }

        let total: usize = p.row_count.iter().map(|&c| c as usize).sum();
        if dst.len() < total {
            return Err(Error::InvalidOperation(format!(
                "destination holds {} values but {} are required",
                dst.len(),
                total,
            )));
        }

        let item_size = p.ty.size() as usize;
        for (chunk, out) in p.list_data.chunks_exact(item_size).zip(dst.iter_mut()) {
            *out = T::from_scalar(p.ty, chunk);
        }

        Ok(())
    }

    /// The per-row item counts of the list property `prop` of the loaded
    /// element, or `None` if nothing is loaded or `prop` is not a list.
    pub fn list_row_counts(&self, prop: PropIndex) -> Option<&[u32]> {
        if !self.element_loaded {
            return None;
        }
        let p = self.elements[self.current_element].properties.get(prop.as_usize())?;
        if !p.is_list() {
            return None;
        }
        Some(&p.row_count)
    }

    /// The total number of items in the list property `prop`, over all rows.
    /// Returns 0 if `prop` is not a loaded list property.
    pub fn sum_of_list_counts(&self, prop: PropIndex) -> u32 {
        self.list_row_counts(prop)
            .map(|counts| counts.iter().sum())
            .unwrap_or(0)
    }

    /// The number of triangles the polygons in `prop` decompose into: a row
    /// with `n >= 3` items yields `n - 2` triangles, shorter rows yield
    /// none. Returns 0 if `prop` is not a loaded list property.
    pub fn count_triangles(&self, prop: PropIndex) -> u32 {
        self.list_row_counts(prop)
            .map(|counts| counts.iter().filter(|&&c| c >= 3).map(|&c| c - 2).sum())
            .unwrap_or(0)
    }

    /// Whether every row of the list property `prop` has exactly `n` items.
    pub fn all_rows_have_n(&self, prop: PropIndex, n: u32) -> bool {
        self.list_row_counts(prop)
            .map(|counts| counts.iter().all(|&c| c == n))
            .unwrap_or(false)
    }

    /// Converts the polygons of the list property `prop` into a triangle
    /// index buffer, ear clipping any polygon with more than three vertices.
    ///
    /// `positions` is the flat `x y z` array of the mesh's `num_verts`
    /// vertex positions (needed to triangulate non-planar-quad polygons);
    /// `dst` must have room for `3 * count_triangles(prop)` indices.
    /// Polygons with out-of-range indices are skipped.
    pub fn extract_triangles(
        &self,
        prop: PropIndex,
        positions: &[f32],
        num_verts: u32,
        dst: &mut [i32],
    ) -> Result<(), Error> {
        let elem = self.loaded_element()?;
        let p = elem.properties.get(prop.as_usize()).ok_or_else(|| {
            Error::InvalidOperation(format!("property index {} out of range", prop.0))
        })?;
        if !p.is_list() {
            return Err(Error::InvalidOperation(format!(
                "property '{}' is not a list",
                p.name,
            )));
        }

        let num_triangles = self.count_triangles(prop);
        if num_triangles == 0 {
            return Err(Error::InvalidOperation(format!(
                "property '{}' contains no triangles",
                p.name,
            )));
        }
        let num_indices = num_triangles as usize * 3;
        if dst.len() < num_indices {
            return Err(Error::InvalidOperation(format!(
                "destination holds {} indices but {} are required",
                dst.len(),
                num_indices,
            )));
        }
        let dst = &mut dst[..num_indices];

        let item_size = p.ty.size() as usize;
        let int_typed = matches!(p.ty, ScalarType::Int | ScalarType::UInt);

        if self.all_rows_have_n(prop, 3) {
            if int_typed {
                // Triangles with index-compatible types: one block copy.
                NativeEndian::read_i32_into(&p.list_data, dst);
            } else {
                for (chunk, out) in p.list_data.chunks_exact(item_size).zip(dst.iter_mut()) {
                    *out = i32::from_scalar(p.ty, chunk);
                }
            }
        } else if int_typed {
            // Copy contiguous runs of triangles in one go and triangulate
            // the other polygons as they come up.
            let mut out = 0;
            let mut run_start = 0usize;
            let mut in_run = false;
            for row in 0..elem.count as usize {
                if p.row_count[row] == 3 {
                    if !in_run {
                        run_start = row;
                    }
                    in_run = true;
                    continue;
                }

                if in_run {
                    out += copy_triangle_run(p, run_start, row, &mut dst[out..]);
                }
                in_run = false;

                let face_verts = p.row_count[row] as usize;
                if face_verts >= 4 {
                    let start = p.row_start[row] as usize;
                    let mut poly: SmallVec<[i32; 16]> = SmallVec::with_capacity(face_verts);
                    for chunk in p.list_data[start..start + face_verts * 4].chunks_exact(4) {
                        poly.push(NativeEndian::read_i32(chunk));
                    }
                    let tris = triangulate_polygon(&poly, positions, num_verts, &mut dst[out..]);
                    out += tris as usize * 3;
                }
            }
            if in_run {
                copy_triangle_run(p, run_start, elem.count as usize, &mut dst[out..]);
            }
        } else {
            // Polygons whose indices need type conversion first.
            let mut out = 0;
            let mut poly: SmallVec<[i32; 16]> = SmallVec::new();
            for row in 0..elem.count as usize {
                let face_verts = p.row_count[row] as usize;
                if face_verts < 3 {
                    continue;
                }
                let start = p.row_start[row] as usize;
                poly.clear();
                for chunk in p.list_data[start..start + face_verts * item_size]
                    .chunks_exact(item_size)
                {
                    poly.push(i32::from_scalar(p.ty, chunk));
                }

                if face_verts == 3 {
                    dst[out..out + 3].copy_from_slice(&poly);
                    out += 3;
                } else {
                    let tris = triangulate_polygon(&poly, positions, num_verts, &mut dst[out..]);
                    out += tris as usize * 3;
                }
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn raw_element_data(&self) -> &[u8] {
        &self.element_data
    }
}

/// Copies the triangle rows `[from, to)` of `prop` (known to have type
/// `int`/`uint` and row count 3) into `dst` in one go. Returns the number of
/// indices written.
fn copy_triangle_run(prop: &PropertyDef, from: usize, to: usize, dst: &mut [i32]) -> usize {
    let num_ints = (to - from) * 3;
    let start = prop.row_start[from] as usize;
    NativeEndian::read_i32_into(
        &prop.list_data[start..start + num_ints * 4],
        &mut dst[..num_ints],
    );
    num_ints
}


// ===========================================================================
// ===== Header parsing helpers
// ===========================================================================

fn header_error<R: Read + Seek>(buf: &Buffer<R>, msg: impl Into<String>) -> Error {
    Error::InvalidHeader(msg.into(), buf.offset())
}

fn data_error<R: Read + Seek>(buf: &Buffer<R>, msg: impl Into<String>) -> Error {
    Error::InvalidData(msg.into(), buf.offset())
}

/// Maps `UnexpectedEof` to success. Used where the input may legally just
/// end, e.g. a missing linebreak after the very last row.
fn eof_ok(res: Result<(), Error>) -> Result<(), Error> {
    match res {
        Err(Error::UnexpectedEof) => Ok(()),
        other => other,
    }
}

/// Parses one `element` declaration plus all of its `property` lines. The
/// caller has already matched (but not consumed) the `element` keyword.
fn parse_element<R: Read + Seek>(buf: &mut Buffer<R>) -> Result<ElementDef, Error> {
    buf.advance()?;
    let name = match buf.identifier(MAX_IDENTIFIER_LEN) {
        Some(name) => name,
        None => return Err(header_error(buf, "invalid element name")),
    };
    buf.advance()?;
    let count = match buf.int_literal() {
        Some(count) => count,
        None => return Err(header_error(buf, "invalid element count")),
    };
    if count < 0 {
        return Err(header_error(
            buf,
            format!("negative count for element '{}'", name),
        ));
    }
    buf.next_line()?;

    let mut elem = ElementDef::new(name, count as u32);
    while buf.keyword(b"property") {
        parse_property(buf, &mut elem.properties)?;
    }
    Ok(elem)
}

/// Parses one `property` declaration. The caller has already matched (but
/// not consumed) the `property` keyword.
fn parse_property<R: Read + Seek>(
    buf: &mut Buffer<R>,
    properties: &mut Vec<PropertyDef>,
) -> Result<(), Error> {
    buf.advance()?;

    let mut count_type = None;
    if buf.keyword(b"list") {
        buf.advance()?;
        count_type = Some(parse_scalar_type(buf)?);
        buf.advance()?;
    }

    let ty = parse_scalar_type(buf)?;
    buf.advance()?;
    let name = match buf.identifier(MAX_IDENTIFIER_LEN) {
        Some(name) => name,
        None => return Err(header_error(buf, "invalid property name")),
    };
    buf.next_line()?;

    properties.push(PropertyDef::new(name, ty, count_type));
    Ok(())
}

fn parse_scalar_type<R: Read + Seek>(buf: &mut Buffer<R>) -> Result<ScalarType, Error> {
    let word = match buf.identifier(MAX_IDENTIFIER_LEN) {
        Some(word) => word,
        None => return Err(header_error(buf, "expected a property type")),
    };
    ScalarType::from_keyword(&word)
        .ok_or_else(|| header_error(buf, format!("unknown property type '{}'", word)))
}


// ===========================================================================
// ===== Body loading: the three payload strategies
// ===========================================================================

/// Loads an element without list properties. For binary files this is one
/// block read of `count * row_stride` bytes straight into `data` (plus an
/// in-place swap pass if the file endianness is not the host's); ASCII files
/// are parsed row by row.
fn load_fixed_size_element<R: Read + Seek>(
    buf: &mut Buffer<R>,
    elem: &ElementDef,
    encoding: Encoding,
    data: &mut Vec<u8>,
) -> Result<(), Error> {
    let num_bytes = elem.count as usize * elem.row_stride as usize;
    data.resize(num_bytes, 0);

    if encoding == Encoding::Ascii {
        let mut back = 0;
        for _ in 0..elem.count {
            for prop in &elem.properties {
                load_ascii_scalar(buf, prop.ty, data, &mut back)?;
            }
            eof_ok(buf.next_line())?;
        }
        return Ok(());
    }

    let mut filled = 0;
    while filled < num_bytes {
        let avail = buf.available();
        if avail.is_empty() {
            if !buf.refill()? {
                return Err(data_error(buf, "unexpected end of file in element data"));
            }
            continue;
        }
        let n = avail.len().min(num_bytes - filled);
        data[filled..filled + n].copy_from_slice(&avail[..n]);
        buf.consume(n);
        filled += n;
    }

    if encoding != Encoding::binary_native() {
        // Swap every field of the block to host order.
        let mut off = 0;
        for _ in 0..elem.count {
            for prop in &elem.properties {
                let size = prop.ty.size() as usize;
                if size > 1 {
                    data[off..off + size].reverse();
                }
                off += size;
            }
        }
    }

    Ok(())
}

/// Loads an element containing list properties: a per-row, per-property
/// walk. Scalar properties go into `data` at their running offset, list
/// payloads are appended to their property's own buffers.
fn load_variable_size_element<R: Read + Seek>(
    buf: &mut Buffer<R>,
    elem: &mut ElementDef,
    encoding: Encoding,
    data: &mut Vec<u8>,
) -> Result<(), Error> {
    data.resize(elem.count as usize * elem.row_stride as usize, 0);

    if encoding == Encoding::Ascii {
        let mut back = 0;
        for _ in 0..elem.count {
            for prop in &mut elem.properties {
                match prop.count_type {
                    None => load_ascii_scalar(buf, prop.ty, data, &mut back)?,
                    Some(count_type) => load_ascii_list(buf, prop, count_type)?,
                }
            }
            eof_ok(buf.next_line())?;
        }
        return Ok(());
    }

    let swap = encoding != Encoding::binary_native();
    let mut back = 0;
    for _ in 0..elem.count {
        for prop in &mut elem.properties {
            match prop.count_type {
                None => load_binary_scalar(buf, prop.ty, swap, data, &mut back)?,
                Some(count_type) => load_binary_list(buf, prop, count_type, swap)?,
            }
        }
    }

    Ok(())
}

/// Reads one binary scalar value into `data` at `*back`, swapping it to
/// host order if `swap` is set.
fn load_binary_scalar<R: Read + Seek>(
    buf: &mut Buffer<R>,
    ty: ScalarType,
    swap: bool,
    data: &mut [u8],
    back: &mut usize,
) -> Result<(), Error> {
    let size = ty.size() as usize;
    if !buf.ensure(size)? {
        return Err(data_error(buf, "unexpected end of file in element data"));
    }
    data[*back..*back + size].copy_from_slice(buf.bytes(size));
    buf.consume(size);
    if swap && size > 1 {
        data[*back..*back + size].reverse();
    }
    *back += size;
    Ok(())
}

/// Reads one binary list (count plus payload), appending the payload to the
/// property's buffers.
fn load_binary_list<R: Read + Seek>(
    buf: &mut Buffer<R>,
    prop: &mut PropertyDef,
    count_type: ScalarType,
    swap: bool,
) -> Result<(), Error> {
    let count = read_binary_list_count(buf, count_type, swap)?;

    let item_size = prop.ty.size() as usize;
    let num_bytes = count as usize * item_size;
    if !buf.ensure(num_bytes)? {
        return Err(data_error(buf, "unexpected end of file in list data"));
    }

    let back = prop.list_data.len();
    prop.row_start.push(back as u32);
    prop.row_count.push(count);
    prop.list_data.extend_from_slice(buf.bytes(num_bytes));
    buf.consume(num_bytes);

    if swap && item_size > 1 {
        for item in prop.list_data[back..].chunks_exact_mut(item_size) {
            item.reverse();
        }
    }

    Ok(())
}

/// Reads and validates the count field of a binary list. The count must
/// have an integer type and be non-negative.
fn read_binary_list_count<R: Read + Seek>(
    buf: &mut Buffer<R>,
    count_type: ScalarType,
    swap: bool,
) -> Result<u32, Error> {
    let size = count_type.size() as usize;
    if !buf.ensure(size)? {
        return Err(data_error(buf, "unexpected end of file in list count"));
    }
    let mut raw = [0u8; 8];
    raw[..size].copy_from_slice(buf.bytes(size));
    if swap {
        raw[..size].reverse();
    }

    let count = match count_type {
        ScalarType::Char => i32::from(raw[0] as i8),
        ScalarType::UChar => i32::from(raw[0]),
        ScalarType::Short => i32::from(NativeEndian::read_i16(&raw)),
        ScalarType::UShort => i32::from(NativeEndian::read_u16(&raw)),
        ScalarType::Int => NativeEndian::read_i32(&raw),
        ScalarType::UInt => NativeEndian::read_u32(&raw) as i32,
        ScalarType::Float | ScalarType::Double => {
            return Err(data_error(buf, "list count has a non-integer type"));
        }
    };
    if count < 0 {
        return Err(data_error(buf, "negative list count"));
    }

    buf.consume(size);
    Ok(count as u32)
}

/// Parses one ASCII value of the given type and stores its native binary
/// form in `data` at `*back`.
fn load_ascii_scalar<R: Read + Seek>(
    buf: &mut Buffer<R>,
    ty: ScalarType,
    data: &mut [u8],
    back: &mut usize,
) -> Result<(), Error> {
    let mut raw = [0u8; 8];
    ascii_value(buf, ty, &mut raw)?;
    let size = ty.size() as usize;
    data[*back..*back + size].copy_from_slice(&raw[..size]);
    *back += size;
    Ok(())
}

/// Parses one ASCII list: an integer count followed by that many values.
fn load_ascii_list<R: Read + Seek>(
    buf: &mut Buffer<R>,
    prop: &mut PropertyDef,
    count_type: ScalarType,
) -> Result<(), Error> {
    if !count_type.is_integer() {
        return Err(data_error(buf, "list count has a non-integer type"));
    }
    let count = match buf.int_literal() {
        Some(count) => count,
        None => return Err(data_error(buf, "invalid list count")),
    };
    if count < 0 {
        return Err(data_error(buf, "negative list count"));
    }
    buf.advance()?;

    let item_size = prop.ty.size() as usize;
    let mut back = prop.list_data.len();
    prop.row_start.push(back as u32);
    prop.row_count.push(count as u32);
    prop.list_data.resize(back + count as usize * item_size, 0);

    for _ in 0..count {
        let mut raw = [0u8; 8];
        ascii_value(buf, prop.ty, &mut raw)?;
        prop.list_data[back..back + item_size].copy_from_slice(&raw[..item_size]);
        back += item_size;
    }

    Ok(())
}

/// Parses one ASCII literal of the given type into the first `size` bytes
/// of `out` (native endian), then skips trailing inline whitespace.
fn ascii_value<R: Read + Seek>(
    buf: &mut Buffer<R>,
    ty: ScalarType,
    out: &mut [u8; 8],
) -> Result<(), Error> {
    match ty {
        ScalarType::Char | ScalarType::UChar | ScalarType::Short | ScalarType::UShort
        | ScalarType::Int | ScalarType::UInt => {
            let v = match buf.int_literal() {
                Some(v) => v,
                None => return Err(data_error(buf, "invalid integer literal")),
            };
            match ty {
                ScalarType::Char => out[0] = v as i8 as u8,
                ScalarType::UChar => out[0] = v as u8,
                ScalarType::Short => NativeEndian::write_i16(&mut out[..2], v as i16),
                ScalarType::UShort => NativeEndian::write_u16(&mut out[..2], v as u16),
                ScalarType::Int => NativeEndian::write_i32(&mut out[..4], v),
                ScalarType::UInt => NativeEndian::write_u32(&mut out[..4], v as u32),
                _ => unreachable!(),
            }
        }
        ScalarType::Float => {
            let v = match buf.float_literal() {
                Some(v) => v,
                None => return Err(data_error(buf, "invalid float literal")),
            };
            NativeEndian::write_f32(&mut out[..4], v);
        }
        ScalarType::Double => {
            let v = match buf.double_literal() {
                Some(v) => v,
                None => return Err(data_error(buf, "invalid double literal")),
            };
            NativeEndian::write_f64(&mut out[..8], v);
        }
    }

    eof_ok(buf.advance())
}
