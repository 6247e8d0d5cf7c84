//! The raw building blocks of a PLY file: scalar type tags and the element
//! and property descriptors produced by the header parser.
//!
//! Most of this is public because the descriptors *are* the API for
//! inspecting a file: [`Reader::elements`][crate::Reader::elements] hands
//! them out, and all extraction calls are phrased in terms of property names
//! or [`PropIndex`] values looked up here.

use std::fmt;

use byteorder::{ByteOrder, NativeEndian};
use derive_more::From;


/// Index of a property in the ordered property list of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, From)]
pub struct PropIndex(pub u32);

impl PropIndex {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}


/// The eight primitive types a PLY property can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarType {
    /// The number of bytes a value of this type occupies.
    pub fn size(&self) -> u32 {
        match self {
            ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Double => 8,
        }
    }

    /// Returns `true` for everything except `Float` and `Double`.
    pub fn is_integer(&self) -> bool {
        !matches!(self, ScalarType::Float | ScalarType::Double)
    }

    /// Parses a type name as it appears in `property` lines. Both the
    /// classical names (`char`, `uchar`, ...) and the explicit-width aliases
    /// (`int8`, `uint16`, ...) are accepted.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "char" | "int8" => Some(ScalarType::Char),
            "uchar" | "uint8" => Some(ScalarType::UChar),
            "short" | "int16" => Some(ScalarType::Short),
            "ushort" | "uint16" => Some(ScalarType::UShort),
            "int" | "int32" => Some(ScalarType::Int),
            "uint" | "uint32" => Some(ScalarType::UInt),
            "float" => Some(ScalarType::Float),
            "double" => Some(ScalarType::Double),
            _ => None,
        }
    }

    /// The canonical (short) name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Char => "char",
            ScalarType::UChar => "uchar",
            ScalarType::Short => "short",
            ScalarType::UShort => "ushort",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


/// A type that a PLY scalar value can be converted into.
///
/// The conversion reads a native-endian value of the given source type and
/// casts it: integers widen into floats, `f64` narrows by rounding, and
/// float to integer conversion truncates. Out of range values are not
/// checked.
pub trait FromScalar: Copy {
    /// The PLY type tag matching `Self` exactly.
    const SCALAR_TYPE: ScalarType;

    fn from_scalar(ty: ScalarType, raw: &[u8]) -> Self;
}

macro_rules! impl_from_scalar {
    ($target:ty, $variant:ident) => {
        impl FromScalar for $target {
            const SCALAR_TYPE: ScalarType = ScalarType::$variant;

            #[inline(always)]
            fn from_scalar(ty: ScalarType, raw: &[u8]) -> Self {
                match ty {
                    ScalarType::Char => raw[0] as i8 as $target,
                    ScalarType::UChar => raw[0] as $target,
                    ScalarType::Short => NativeEndian::read_i16(raw) as $target,
                    ScalarType::UShort => NativeEndian::read_u16(raw) as $target,
                    ScalarType::Int => NativeEndian::read_i32(raw) as $target,
                    ScalarType::UInt => NativeEndian::read_u32(raw) as $target,
                    ScalarType::Float => NativeEndian::read_f32(raw) as $target,
                    ScalarType::Double => NativeEndian::read_f64(raw) as $target,
                }
            }
        }
    };
}

impl_from_scalar!(i8, Char);
impl_from_scalar!(u8, UChar);
impl_from_scalar!(i16, Short);
impl_from_scalar!(u16, UShort);
impl_from_scalar!(i32, Int);
impl_from_scalar!(u32, UInt);
impl_from_scalar!(f32, Float);
impl_from_scalar!(f64, Double);


/// The header definition of one property of an element, plus -- for list
/// properties -- the row data of the currently loaded element.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,

    /// The type of the property's values.
    pub ty: ScalarType,

    /// `None` for scalar properties. For list properties, the type in which
    /// the per-row item count is stored.
    pub count_type: Option<ScalarType>,

    /// Byte offset of this property inside the fixed-size part of a row.
    /// Only meaningful for scalar properties.
    pub offset: u32,

    /// The concatenated raw payloads (native endian, no count prefixes) of
    /// all rows of a list property. Empty until the element is loaded.
    pub list_data: Vec<u8>,

    /// Byte index into `list_data` at which row `i` starts.
    pub row_start: Vec<u32>,

    /// Number of items (not bytes) in row `i`.
    pub row_count: Vec<u32>,
}

impl PropertyDef {
    pub(crate) fn new(name: String, ty: ScalarType, count_type: Option<ScalarType>) -> Self {
        Self {
            name,
            ty,
            count_type,
            offset: 0,
            list_data: Vec::new(),
            row_start: Vec::new(),
            row_count: Vec::new(),
        }
    }

    /// Whether this is a list property.
    pub fn is_list(&self) -> bool {
        self.count_type.is_some()
    }

    /// Drops the per-element row data, returning the memory to the system.
    pub(crate) fn release_row_data(&mut self) {
        self.list_data = Vec::new();
        self.row_start = Vec::new();
        self.row_count = Vec::new();
    }
}


/// The header definition of one element group.
#[derive(Debug, Clone)]
pub struct ElementDef {
    pub name: String,

    /// The number of rows in this element.
    pub count: u32,

    /// Definitions for all properties of this element, in on-disk order.
    pub properties: Vec<PropertyDef>,

    /// `true` if there are no list properties in this element, i.e. all rows
    /// have the same on-disk size.
    pub fixed_size: bool,

    /// The byte size of the scalar properties of one row. List properties do
    /// not contribute to this.
    pub row_stride: u32,
}

impl ElementDef {
    pub(crate) fn new(name: String, count: u32) -> Self {
        Self {
            name,
            count,
            properties: Vec::new(),
            fixed_size: true,
            row_stride: 0,
        }
    }

    /// Returns the index of the property with the given name, if any.
    pub fn find_property(&self, prop_name: &str) -> Option<PropIndex> {
        self.properties
            .iter()
            .position(|p| p.name == prop_name)
            .map(|idx| PropIndex(idx as u32))
    }

    /// Recomputes `fixed_size`, `row_stride` and the per-property offsets by
    /// a single walk over the properties. Scalar properties are packed
    /// tightly with no padding, matching the on-disk layout of fixed-size
    /// elements bit for bit.
    pub(crate) fn calc_offsets(&mut self) {
        self.fixed_size = self.properties.iter().all(|p| !p.is_list());
        self.row_stride = 0;
        for prop in &mut self.properties {
            if prop.is_list() {
                continue;
            }
            prop.offset = self.row_stride;
            self.row_stride += prop.ty.size();
        }
    }

    /// Replaces the list property at `prop` with a scalar count column (of
    /// the list's count type; its value is ignored on load) followed by `n`
    /// scalar value columns, as if the file had declared them that way.
    ///
    /// This is only correct if every row of the list really has `n` items,
    /// which this function cannot check -- it must be called *before* the
    /// element is loaded. The reward is that an element whose only list
    /// property was converted becomes fixed-size and loads through the block
    /// read path.
    ///
    /// Returns the indices of the `n` new value columns, or `None` if `prop`
    /// does not name a list property.
    pub fn convert_list_to_fixed_size(&mut self, prop: PropIndex, n: u32) -> Option<Vec<PropIndex>> {
        let idx = prop.as_usize();
        if n == 0 || idx >= self.properties.len() || !self.properties[idx].is_list() {
            return None;
        }

        let old = self.properties.remove(idx);
        let count_type = old.count_type?;

        let mut insert_at = idx;
        self.properties.insert(
            insert_at,
            PropertyDef::new(format!("{}_count", old.name), count_type, None),
        );
        insert_at += 1;

        let mut columns = Vec::with_capacity(n as usize);
        for i in 0..n {
            self.properties.insert(
                insert_at,
                PropertyDef::new(format!("{}_{}", old.name, i), old.ty, None),
            );
            columns.push(PropIndex(insert_at as u32));
            insert_at += 1;
        }

        self.calc_offsets();
        Some(columns)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn quad_face_element() -> ElementDef {
        let mut elem = ElementDef::new("face".into(), 6);
        elem.properties.push(PropertyDef::new(
            "vertex_indices".into(),
            ScalarType::Int,
            Some(ScalarType::UChar),
        ));
        elem.calc_offsets();
        elem
    }

    #[test]
    fn offsets_skip_lists() {
        let mut elem = ElementDef::new("vertex".into(), 8);
        elem.properties.push(PropertyDef::new("x".into(), ScalarType::Float, None));
        elem.properties.push(PropertyDef::new(
            "ids".into(),
            ScalarType::Int,
            Some(ScalarType::UChar),
        ));
        elem.properties.push(PropertyDef::new("w".into(), ScalarType::Double, None));
        elem.calc_offsets();

        assert!(!elem.fixed_size);
        assert_eq!(elem.row_stride, 12);
        assert_eq!(elem.properties[0].offset, 0);
        assert_eq!(elem.properties[2].offset, 4);
    }

    #[test]
    fn list_conversion_produces_fixed_layout() {
        let mut elem = quad_face_element();
        let cols = elem.convert_list_to_fixed_size(PropIndex(0), 4).unwrap();

        assert!(elem.fixed_size);
        assert_eq!(elem.row_stride, 1 + 4 * 4);
        assert_eq!(elem.properties.len(), 5);
        assert_eq!(elem.properties[0].name, "vertex_indices_count");
        assert_eq!(cols, vec![PropIndex(1), PropIndex(2), PropIndex(3), PropIndex(4)]);
        assert_eq!(elem.properties[1].offset, 1);
        assert_eq!(elem.properties[4].offset, 1 + 3 * 4);
    }

    #[test]
    fn list_conversion_rejects_scalars() {
        let mut elem = quad_face_element();
        elem.properties.push(PropertyDef::new("w".into(), ScalarType::Float, None));
        elem.calc_offsets();
        assert!(elem.convert_list_to_fixed_size(PropIndex(1), 3).is_none());
        assert!(elem.convert_list_to_fixed_size(PropIndex(7), 3).is_none());
    }

    #[test]
    fn scalar_conversions_cast() {
        let raw = 3.75f64.to_ne_bytes();
        assert_eq!(f32::from_scalar(ScalarType::Double, &raw), 3.75);
        assert_eq!(i32::from_scalar(ScalarType::Double, &raw), 3);

        let raw = (-2i16).to_ne_bytes();
        assert_eq!(f32::from_scalar(ScalarType::Short, &raw), -2.0);
        assert_eq!(u8::from_scalar(ScalarType::Short, &raw), 254);
    }
}
