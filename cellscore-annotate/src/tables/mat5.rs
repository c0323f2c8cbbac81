//! MAT-file level 5 codec
//!
//! Reads and writes the subset of the format used by the upstream cell
//! tables: numeric, char, cell and struct arrays, optionally wrapped in
//! zlib-compressed elements. Classes this codec does not model (sparse,
//! object, function handles) are kept as raw element bytes so that a
//! load/save cycle never drops data.
//!
//! Layout reminders:
//! - 128-byte header: 116 bytes text, 8 bytes subsystem offset, version, endian indicator
//! - every data element has an 8-byte tag (type, byte count) and is padded to 8 bytes
//! - small elements (≤ 4 bytes) pack the tag and data into 8 bytes
//! - array elements list values in column-major order

use super::TableError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::Path;

const HEADER_LEN: usize = 128;
const HEADER_TEXT_LEN: usize = 116;
const VERSION: u16 = 0x0100;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;
const MI_UTF16: u32 = 17;

const MX_CELL: u8 = 1;
const MX_STRUCT: u8 = 2;
const MX_CHAR: u8 = 4;
const MX_DOUBLE: u8 = 6;
const MX_SINGLE: u8 = 7;
const MX_INT8: u8 = 8;
const MX_UINT8: u8 = 9;
const MX_INT16: u8 = 10;
const MX_UINT16: u8 = 11;
const MX_INT32: u8 = 12;
const MX_UINT32: u8 = 13;
const MX_INT64: u8 = 14;
const MX_UINT64: u8 = 15;

const FLAG_COMPLEX: u32 = 0x0800;
const FLAG_GLOBAL: u32 = 0x0400;
const FLAG_LOGICAL: u32 = 0x0200;

/// Minimum field name slot written for struct arrays
const MIN_FIELD_NAME_LEN: usize = 32;

/// Typed numeric payload
#[derive(Debug, Clone, PartialEq)]
pub enum NumericData {
    Double(Vec<f64>),
    Single(Vec<f32>),
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
}

macro_rules! cast_all {
    ($data:expr, $t:ty) => {
        match $data {
            NumericData::Double(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::Single(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::Int8(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::UInt8(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::Int16(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::UInt16(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::Int32(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::UInt32(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::Int64(v) => v.iter().map(|&x| x as $t).collect(),
            NumericData::UInt64(v) => v.iter().map(|&x| x as $t).collect(),
        }
    };
}

macro_rules! decode_chunks {
    ($bytes:expr, $t:ty, $big_endian:expr) => {{
        const WIDTH: usize = std::mem::size_of::<$t>();
        $bytes
            .chunks_exact(WIDTH)
            .map(|chunk| {
                let mut raw = [0u8; WIDTH];
                raw.copy_from_slice(chunk);
                if $big_endian {
                    <$t>::from_be_bytes(raw)
                } else {
                    <$t>::from_le_bytes(raw)
                }
            })
            .collect::<Vec<$t>>()
    }};
}

impl NumericData {
    pub fn len(&self) -> usize {
        match self {
            NumericData::Double(v) => v.len(),
            NumericData::Single(v) => v.len(),
            NumericData::Int8(v) => v.len(),
            NumericData::UInt8(v) => v.len(),
            NumericData::Int16(v) => v.len(),
            NumericData::UInt16(v) => v.len(),
            NumericData::Int32(v) => v.len(),
            NumericData::UInt32(v) => v.len(),
            NumericData::Int64(v) => v.len(),
            NumericData::UInt64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` widened to `f64`
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            NumericData::Double(v) => v.get(index).copied(),
            NumericData::Single(v) => v.get(index).map(|&x| x as f64),
            NumericData::Int8(v) => v.get(index).map(|&x| x as f64),
            NumericData::UInt8(v) => v.get(index).map(|&x| x as f64),
            NumericData::Int16(v) => v.get(index).map(|&x| x as f64),
            NumericData::UInt16(v) => v.get(index).map(|&x| x as f64),
            NumericData::Int32(v) => v.get(index).map(|&x| x as f64),
            NumericData::UInt32(v) => v.get(index).map(|&x| x as f64),
            NumericData::Int64(v) => v.get(index).map(|&x| x as f64),
            NumericData::UInt64(v) => v.get(index).map(|&x| x as f64),
        }
    }

    /// Array class this payload is written as
    fn class(&self) -> u8 {
        match self {
            NumericData::Double(_) => MX_DOUBLE,
            NumericData::Single(_) => MX_SINGLE,
            NumericData::Int8(_) => MX_INT8,
            NumericData::UInt8(_) => MX_UINT8,
            NumericData::Int16(_) => MX_INT16,
            NumericData::UInt16(_) => MX_UINT16,
            NumericData::Int32(_) => MX_INT32,
            NumericData::UInt32(_) => MX_UINT32,
            NumericData::Int64(_) => MX_INT64,
            NumericData::UInt64(_) => MX_UINT64,
        }
    }

    /// Convert stored values to the element type of an array class
    fn cast_to_class(self, class: u8) -> Result<NumericData, TableError> {
        if self.class() == class {
            return Ok(self);
        }
        let data = &self;
        Ok(match class {
            MX_DOUBLE => NumericData::Double(cast_all!(data, f64)),
            MX_SINGLE => NumericData::Single(cast_all!(data, f32)),
            MX_INT8 => NumericData::Int8(cast_all!(data, i8)),
            MX_UINT8 => NumericData::UInt8(cast_all!(data, u8)),
            MX_INT16 => NumericData::Int16(cast_all!(data, i16)),
            MX_UINT16 => NumericData::UInt16(cast_all!(data, u16)),
            MX_INT32 => NumericData::Int32(cast_all!(data, i32)),
            MX_UINT32 => NumericData::UInt32(cast_all!(data, u32)),
            MX_INT64 => NumericData::Int64(cast_all!(data, i64)),
            MX_UINT64 => NumericData::UInt64(cast_all!(data, u64)),
            other => {
                return Err(TableError::Mat(format!("class {} is not numeric", other)));
            }
        })
    }

    /// Decode a data element of storage type `mi_type`
    fn decode(mi_type: u32, bytes: &[u8], big_endian: bool) -> Result<NumericData, TableError> {
        Ok(match mi_type {
            MI_INT8 => NumericData::Int8(bytes.iter().map(|&b| b as i8).collect()),
            MI_UINT8 | MI_UTF8 => NumericData::UInt8(bytes.to_vec()),
            MI_INT16 => NumericData::Int16(decode_chunks!(bytes, i16, big_endian)),
            MI_UINT16 | MI_UTF16 => NumericData::UInt16(decode_chunks!(bytes, u16, big_endian)),
            MI_INT32 => NumericData::Int32(decode_chunks!(bytes, i32, big_endian)),
            MI_UINT32 => NumericData::UInt32(decode_chunks!(bytes, u32, big_endian)),
            MI_SINGLE => NumericData::Single(decode_chunks!(bytes, f32, big_endian)),
            MI_DOUBLE => NumericData::Double(decode_chunks!(bytes, f64, big_endian)),
            MI_INT64 => NumericData::Int64(decode_chunks!(bytes, i64, big_endian)),
            MI_UINT64 => NumericData::UInt64(decode_chunks!(bytes, u64, big_endian)),
            other => {
                return Err(TableError::Mat(format!("unexpected numeric storage type {}", other)));
            }
        })
    }

    /// Storage type and little-endian bytes
    fn encode(&self) -> (u32, Vec<u8>) {
        fn le<T: Copy, const N: usize>(values: &[T], f: fn(T) -> [u8; N]) -> Vec<u8> {
            values.iter().flat_map(|&v| f(v)).collect()
        }
        match self {
            NumericData::Double(v) => (MI_DOUBLE, le(v, f64::to_le_bytes)),
            NumericData::Single(v) => (MI_SINGLE, le(v, f32::to_le_bytes)),
            NumericData::Int8(v) => (MI_INT8, v.iter().map(|&x| x as u8).collect()),
            NumericData::UInt8(v) => (MI_UINT8, v.clone()),
            NumericData::Int16(v) => (MI_INT16, le(v, i16::to_le_bytes)),
            NumericData::UInt16(v) => (MI_UINT16, le(v, u16::to_le_bytes)),
            NumericData::Int32(v) => (MI_INT32, le(v, i32::to_le_bytes)),
            NumericData::UInt32(v) => (MI_UINT32, le(v, u32::to_le_bytes)),
            NumericData::Int64(v) => (MI_INT64, le(v, i64::to_le_bytes)),
            NumericData::UInt64(v) => (MI_UINT64, le(v, u64::to_le_bytes)),
        }
    }
}

/// Numeric (or logical) array
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    pub dims: Vec<usize>,
    pub logical: bool,
    pub real: NumericData,
    pub imag: Option<NumericData>,
}

impl NumericArray {
    /// 1x1 double
    pub fn scalar(value: f64) -> Self {
        Self {
            dims: vec![1, 1],
            logical: false,
            real: NumericData::Double(vec![value]),
            imag: None,
        }
    }

    /// 0x0 double
    pub fn empty() -> Self {
        Self {
            dims: vec![0, 0],
            logical: false,
            real: NumericData::Double(Vec::new()),
            imag: None,
        }
    }
}

/// Char array stored as UTF-16 code units
#[derive(Debug, Clone, PartialEq)]
pub struct CharArray {
    pub dims: Vec<usize>,
    pub data: Vec<u16>,
}

impl CharArray {
    /// 1xN row string
    pub fn from_text(text: &str) -> Self {
        let data: Vec<u16> = text.encode_utf16().collect();
        Self {
            dims: vec![1, data.len()],
            data,
        }
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.data)
    }
}

/// Cell array
#[derive(Debug, Clone, PartialEq)]
pub struct CellArray {
    pub dims: Vec<usize>,
    pub cells: Vec<MatArray>,
}

/// Struct array; `elements[i][f]` is field `f` of element `i` (column-major)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructArray {
    pub dims: Vec<usize>,
    pub field_names: Vec<String>,
    pub elements: Vec<Vec<MatArray>>,
}

impl StructArray {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_names.iter().position(|f| f == name)
    }

    /// Field value of one element
    pub fn get(&self, element: usize, field: &str) -> Option<&MatArray> {
        let f = self.field_index(field)?;
        self.elements.get(element).and_then(|e| e.get(f))
    }
}

/// Any array value held in a MAT-file
#[derive(Debug, Clone, PartialEq)]
pub enum MatArray {
    Numeric(NumericArray),
    Char(CharArray),
    Cell(CellArray),
    Struct(StructArray),
    /// Raw little-endian `miMATRIX` element (tag included) of a class not modeled here
    Opaque(Vec<u8>),
}

impl MatArray {
    /// 1x1 double
    pub fn scalar(value: f64) -> Self {
        MatArray::Numeric(NumericArray::scalar(value))
    }

    /// First real value of a non-empty numeric array
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MatArray::Numeric(n) if n.real.len() == 1 => n.real.get_f64(0),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructArray> {
        match self {
            MatArray::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct_mut(&mut self) -> Option<&mut StructArray> {
        match self {
            MatArray::Struct(s) => Some(s),
            _ => None,
        }
    }
}

/// Top-level named variable
#[derive(Debug, Clone, PartialEq)]
pub struct MatVariable {
    pub name: String,
    pub array: MatArray,
    pub global: bool,
    /// Written inside a zlib-compressed element
    pub compressed: bool,
}

/// A whole MAT-file: header text plus variables in file order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatFile {
    pub header_text: String,
    pub variables: Vec<MatVariable>,
}

impl MatFile {
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn write(&self, path: &Path) -> Result<(), TableError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&MatVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut MatVariable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TableError> {
        if bytes.len() < HEADER_LEN {
            return Err(TableError::Mat("file shorter than the 128-byte header".to_string()));
        }

        let big_endian = match &bytes[126..128] {
            b"IM" => false,
            b"MI" => true,
            _ => {
                return Err(TableError::Unsupported(
                    "not a level 5 MAT-file (missing endian indicator)".to_string(),
                ))
            }
        };

        let header_text = String::from_utf8_lossy(&bytes[..HEADER_TEXT_LEN])
            .trim_end_matches(|c: char| c == ' ' || c == '\0')
            .to_string();

        let mut reader = Reader::new(&bytes[HEADER_LEN..], big_endian);
        let mut variables = Vec::new();

        while !reader.at_end() {
            let element = reader.read_element()?;
            match element.mi_type {
                MI_MATRIX => {
                    let (name, array, global) = parse_matrix(element.data, element.raw, big_endian)?;
                    variables.push(MatVariable { name, array, global, compressed: false });
                }
                MI_COMPRESSED => {
                    let mut inflated = Vec::new();
                    ZlibDecoder::new(element.data).read_to_end(&mut inflated)?;
                    let mut inner = Reader::new(&inflated, big_endian);
                    let matrix = inner.read_element()?;
                    if matrix.mi_type != MI_MATRIX {
                        return Err(TableError::Mat(format!(
                            "compressed element holds type {}, expected a matrix",
                            matrix.mi_type
                        )));
                    }
                    let (name, array, global) = parse_matrix(matrix.data, matrix.raw, big_endian)?;
                    variables.push(MatVariable { name, array, global, compressed: true });
                }
                other => {
                    return Err(TableError::Mat(format!("unexpected top-level element type {}", other)));
                }
            }
        }

        Ok(Self { header_text, variables })
    }

    /// Encode as a little-endian level 5 file
    pub fn to_bytes(&self) -> Result<Vec<u8>, TableError> {
        let mut out = Vec::with_capacity(HEADER_LEN);

        let text = if self.header_text.is_empty() {
            default_header_text()
        } else {
            self.header_text.clone()
        };
        let mut text_bytes = text.into_bytes();
        text_bytes.resize(HEADER_TEXT_LEN, b' ');
        out.extend_from_slice(&text_bytes);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(b"IM");

        for variable in &self.variables {
            let matrix = encode_matrix(&variable.name, &variable.array, variable.global)?;
            if variable.compressed {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&matrix)?;
                let deflated = encoder.finish()?;
                write_element(&mut out, MI_COMPRESSED, &deflated);
            } else {
                out.extend_from_slice(&matrix);
            }
        }

        Ok(out)
    }
}

/// Header text for newly written files
pub fn default_header_text() -> String {
    format!(
        "MATLAB 5.0 MAT-file, Platform: {}, Created on: {}",
        std::env::consts::OS,
        chrono::Local::now().format("%a %b %e %H:%M:%S %Y")
    )
}

struct Element<'a> {
    mi_type: u32,
    data: &'a [u8],
    /// Tag, data and padding as they appear in the stream
    raw: &'a [u8],
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], big_endian: bool) -> Self {
        Self { bytes, pos: 0, big_endian }
    }

    fn at_end(&self) -> bool {
        // trailing padding shorter than a tag is ignored
        self.bytes.len().saturating_sub(self.pos) < 8
    }

    fn u32_at(&self, offset: usize) -> Result<u32, TableError> {
        let slice = self
            .bytes
            .get(offset..offset + 4)
            .ok_or_else(|| TableError::Mat("truncated element tag".to_string()))?;
        let raw = [slice[0], slice[1], slice[2], slice[3]];
        Ok(if self.big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        })
    }

    fn read_element(&mut self) -> Result<Element<'a>, TableError> {
        let start = self.pos;
        let first = self.u32_at(start)?;

        // small data element: byte count in the upper half of the first word
        if first >> 16 != 0 {
            let nbytes = (first >> 16) as usize;
            let mi_type = first & 0xFFFF;
            if nbytes > 4 {
                return Err(TableError::Mat(format!("small element claims {} bytes", nbytes)));
            }
            let data_start = start + 4;
            let end = start + 8;
            if end > self.bytes.len() {
                return Err(TableError::Mat("truncated small element".to_string()));
            }
            self.pos = end;
            return Ok(Element {
                mi_type,
                data: &self.bytes[data_start..data_start + nbytes],
                raw: &self.bytes[start..end],
            });
        }

        let nbytes = self.u32_at(start + 4)? as usize;
        let data_start = start + 8;
        let data_end = data_start
            .checked_add(nbytes)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| TableError::Mat(format!("element of {} bytes overruns the file", nbytes)))?;

        // compressed elements are not padded
        let padded_end = if first == MI_COMPRESSED {
            data_end
        } else {
            (data_end + 7) / 8 * 8
        };
        let end = padded_end.min(self.bytes.len());
        self.pos = end;

        Ok(Element {
            mi_type: first,
            data: &self.bytes[data_start..data_end],
            raw: &self.bytes[start..end],
        })
    }

    fn read_numeric(&mut self) -> Result<NumericData, TableError> {
        let element = self.read_element()?;
        NumericData::decode(element.mi_type, element.data, self.big_endian)
    }
}

/// Parse the body of an `miMATRIX` element into (name, array, global flag)
fn parse_matrix(data: &[u8], raw: &[u8], big_endian: bool) -> Result<(String, MatArray, bool), TableError> {
    // zero-length matrix elements stand for empty arrays
    if data.is_empty() {
        return Ok((String::new(), MatArray::Numeric(NumericArray::empty()), false));
    }

    let mut reader = Reader::new(data, big_endian);

    let flags = match reader.read_numeric()? {
        NumericData::UInt32(words) if !words.is_empty() => words[0],
        _ => return Err(TableError::Mat("array flags must be uint32".to_string())),
    };
    let class = (flags & 0xFF) as u8;
    let complex = flags & FLAG_COMPLEX != 0;
    let global = flags & FLAG_GLOBAL != 0;
    let logical = flags & FLAG_LOGICAL != 0;

    let dims: Vec<usize> = match reader.read_numeric()? {
        NumericData::Int32(d) => d.into_iter().map(|x| x.max(0) as usize).collect(),
        _ => return Err(TableError::Mat("dimensions must be int32".to_string())),
    };
    let count: usize = dims.iter().product();

    let name_element = reader.read_element()?;
    let name = String::from_utf8_lossy(name_element.data).to_string();

    let array = match class {
        MX_DOUBLE | MX_SINGLE | MX_INT8 | MX_UINT8 | MX_INT16 | MX_UINT16 | MX_INT32
        | MX_UINT32 | MX_INT64 | MX_UINT64 => {
            let real = reader.read_numeric()?.cast_to_class(class)?;
            let imag = if complex {
                Some(reader.read_numeric()?.cast_to_class(class)?)
            } else {
                None
            };
            MatArray::Numeric(NumericArray { dims, logical, real, imag })
        }
        MX_CHAR => {
            let element = reader.read_element()?;
            let data = match element.mi_type {
                MI_UTF8 | MI_UINT8 | MI_INT8 => String::from_utf8_lossy(element.data)
                    .encode_utf16()
                    .collect(),
                _ => match NumericData::decode(element.mi_type, element.data, big_endian)? {
                    NumericData::UInt16(units) => units,
                    other => cast_all!(&other, u16),
                },
            };
            MatArray::Char(CharArray { dims, data })
        }
        MX_CELL => {
            let mut cells = Vec::with_capacity(count);
            for _ in 0..count {
                cells.push(read_nested_matrix(&mut reader, big_endian)?);
            }
            MatArray::Cell(CellArray { dims, cells })
        }
        MX_STRUCT => {
            let name_len = match reader.read_numeric()? {
                NumericData::Int32(v) if !v.is_empty() && v[0] > 0 => v[0] as usize,
                _ => return Err(TableError::Mat("invalid field name length".to_string())),
            };
            let names_element = reader.read_element()?;
            let field_names: Vec<String> = names_element
                .data
                .chunks(name_len)
                .map(|chunk| {
                    let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
                    String::from_utf8_lossy(&chunk[..end]).to_string()
                })
                .filter(|name| !name.is_empty())
                .collect();

            let mut elements = Vec::with_capacity(count);
            for _ in 0..count {
                let mut values = Vec::with_capacity(field_names.len());
                for _ in 0..field_names.len() {
                    values.push(read_nested_matrix(&mut reader, big_endian)?);
                }
                elements.push(values);
            }
            MatArray::Struct(StructArray { dims, field_names, elements })
        }
        other => {
            if big_endian {
                return Err(TableError::Unsupported(format!(
                    "array class {} in a big-endian file",
                    other
                )));
            }
            MatArray::Opaque(raw.to_vec())
        }
    };

    Ok((name, array, global))
}

fn read_nested_matrix(reader: &mut Reader<'_>, big_endian: bool) -> Result<MatArray, TableError> {
    let element = reader.read_element()?;
    if element.mi_type != MI_MATRIX {
        return Err(TableError::Mat(format!(
            "expected a nested matrix, found element type {}",
            element.mi_type
        )));
    }
    let (_, array, _) = parse_matrix(element.data, element.raw, big_endian)?;
    Ok(array)
}

fn write_element(out: &mut Vec<u8>, mi_type: u32, data: &[u8]) {
    out.extend_from_slice(&mi_type.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if mi_type != MI_COMPRESSED {
        pad_to_8(out);
    }
}

fn write_small_element(out: &mut Vec<u8>, mi_type: u32, data: &[u8]) {
    let word = ((data.len() as u32) << 16) | mi_type;
    out.extend_from_slice(&word.to_le_bytes());
    let mut payload = [0u8; 4];
    payload[..data.len()].copy_from_slice(data);
    out.extend_from_slice(&payload);
}

fn pad_to_8(out: &mut Vec<u8>) {
    while out.len() % 8 != 0 {
        out.push(0);
    }
}

fn dims_to_i32(dims: &[usize]) -> Result<Vec<u8>, TableError> {
    let mut bytes = Vec::with_capacity(dims.len() * 4);
    for &d in dims {
        let d = i32::try_from(d)
            .map_err(|_| TableError::Mat(format!("dimension {} does not fit in int32", d)))?;
        bytes.extend_from_slice(&d.to_le_bytes());
    }
    Ok(bytes)
}

/// Encode a full `miMATRIX` element, tag included
fn encode_matrix(name: &str, array: &MatArray, global: bool) -> Result<Vec<u8>, TableError> {
    let (class, dims, logical, complex) = match array {
        MatArray::Opaque(raw) => return Ok(raw.clone()),
        MatArray::Numeric(n) => (
            if n.logical { MX_UINT8 } else { n.real.class() },
            &n.dims,
            n.logical,
            n.imag.is_some(),
        ),
        MatArray::Char(c) => (MX_CHAR, &c.dims, false, false),
        MatArray::Cell(c) => (MX_CELL, &c.dims, false, false),
        MatArray::Struct(s) => (MX_STRUCT, &s.dims, false, false),
    };

    let mut body = Vec::new();

    let mut flags = class as u32;
    if complex {
        flags |= FLAG_COMPLEX;
    }
    if global {
        flags |= FLAG_GLOBAL;
    }
    if logical {
        flags |= FLAG_LOGICAL;
    }
    let mut flag_bytes = flags.to_le_bytes().to_vec();
    flag_bytes.extend_from_slice(&0u32.to_le_bytes());
    write_element(&mut body, MI_UINT32, &flag_bytes);

    write_element(&mut body, MI_INT32, &dims_to_i32(dims)?);
    write_element(&mut body, MI_INT8, name.as_bytes());

    match array {
        MatArray::Numeric(n) => {
            let real = if n.logical {
                n.real.clone().cast_to_class(MX_UINT8)?
            } else {
                n.real.clone()
            };
            let (mi_type, bytes) = real.encode();
            write_element(&mut body, mi_type, &bytes);
            if let Some(imag) = &n.imag {
                let (mi_type, bytes) = imag.encode();
                write_element(&mut body, mi_type, &bytes);
            }
        }
        MatArray::Char(c) => {
            let bytes: Vec<u8> = c.data.iter().flat_map(|u| u.to_le_bytes()).collect();
            write_element(&mut body, MI_UINT16, &bytes);
        }
        MatArray::Cell(c) => {
            for cell in &c.cells {
                body.extend_from_slice(&encode_matrix("", cell, false)?);
            }
        }
        MatArray::Struct(s) => {
            let longest = s.field_names.iter().map(|f| f.len()).max().unwrap_or(0);
            let name_len = (longest + 1).max(MIN_FIELD_NAME_LEN);
            write_small_element(&mut body, MI_INT32, &(name_len as i32).to_le_bytes());

            let mut names = Vec::with_capacity(name_len * s.field_names.len());
            for field in &s.field_names {
                let mut slot = field.as_bytes().to_vec();
                slot.resize(name_len, 0);
                names.extend_from_slice(&slot);
            }
            write_element(&mut body, MI_INT8, &names);

            for element in &s.elements {
                if element.len() != s.field_names.len() {
                    return Err(TableError::Mat(format!(
                        "struct element has {} values for {} fields",
                        element.len(),
                        s.field_names.len()
                    )));
                }
                for value in element {
                    body.extend_from_slice(&encode_matrix("", value, false)?);
                }
            }
        }
        MatArray::Opaque(_) => {}
    }

    let mut out = Vec::with_capacity(body.len() + 8);
    write_element(&mut out, MI_MATRIX, &body);
    Ok(out)
}
