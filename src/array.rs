//! # Array Values
//!
//! Runtime-typed n-dimensional array values used throughout the storage
//! engine. A [`ArrayValue`] carries its element type ([`Dtype`]) as a tag so
//! that datasets whose configuration declares a per-type dtype can be loaded
//! without compile-time knowledge of the element type.
//!
//! Stored byte representation is always little-endian, row-major, with no
//! padding between elements. [`ArrayValue::to_le_bytes`] and
//! [`ArrayValue::from_le_bytes`] are the single source of truth for that
//! encoding; both storage backends build on them.

use byteorder::{ByteOrder, LittleEndian};
use ndarray::{concatenate, ArrayD, Axis, IxDyn, Slice};

/// Scalar element type of a stored array.
///
/// Configuration files spell these with numpy-style names (`uint8`,
/// `float32`, ...), which is what [`Dtype::name`] and [`Dtype::from_name`]
/// use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dtype {
    /// 8-bit unsigned integer (`uint8`)
    U8,
    /// 8-bit signed integer (`int8`)
    I8,
    /// 16-bit unsigned integer (`uint16`)
    U16,
    /// 16-bit signed integer (`int16`)
    I16,
    /// 32-bit unsigned integer (`uint32`)
    U32,
    /// 32-bit signed integer (`int32`)
    I32,
    /// 32-bit float (`float32`)
    F32,
    /// 64-bit float (`float64`)
    F64,
}

impl Dtype {
    /// All supported dtypes.
    pub const ALL: [Dtype; 8] = [
        Dtype::U8,
        Dtype::I8,
        Dtype::U16,
        Dtype::I16,
        Dtype::U32,
        Dtype::I32,
        Dtype::F32,
        Dtype::F64,
    ];

    /// Configuration-file name of this dtype.
    pub fn name(&self) -> &'static str {
        match self {
            Dtype::U8 => "uint8",
            Dtype::I8 => "int8",
            Dtype::U16 => "uint16",
            Dtype::I16 => "int16",
            Dtype::U32 => "uint32",
            Dtype::I32 => "int32",
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
        }
    }

    /// Resolve a configuration-file dtype name.
    pub fn from_name(name: &str) -> Option<Dtype> {
        Dtype::ALL.iter().copied().find(|d| d.name() == name)
    }

    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            Dtype::U8 | Dtype::I8 => 1,
            Dtype::U16 | Dtype::I16 => 2,
            Dtype::U32 | Dtype::I32 | Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from array value operations.
#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    /// Two values disagree on element type.
    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch {
        /// The dtype required by the operation.
        expected: Dtype,
        /// The dtype actually supplied.
        actual: Dtype,
    },

    /// Two values disagree on per-item shape.
    #[error("item shape mismatch: expected {expected:?}, got {actual:?}")]
    ItemShapeMismatch {
        /// The per-item shape required by the operation.
        expected: Vec<usize>,
        /// The per-item shape actually supplied.
        actual: Vec<usize>,
    },

    /// A byte buffer does not hold exactly the declared number of elements.
    #[error("buffer of {actual} bytes does not hold a {dtype} array of shape {shape:?} ({expected} bytes)")]
    ByteLength {
        /// Expected byte count for the declared dtype and shape.
        expected: usize,
        /// Actual byte count supplied.
        actual: usize,
        /// Declared dtype.
        dtype: Dtype,
        /// Declared shape.
        shape: Vec<usize>,
    },

    /// A requested item range falls outside the array.
    #[error("item range {start}..{end} out of bounds for {len} items")]
    ItemRange {
        /// Range start (inclusive).
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Number of items in the array.
        len: usize,
    },

    /// A reduction axis does not exist on the array.
    #[error("axis {axis} out of bounds for array of shape {shape:?}")]
    AxisOutOfBounds {
        /// The requested axis.
        axis: usize,
        /// The array shape.
        shape: Vec<usize>,
    },
}

/// Element types that can live inside an [`ArrayValue`].
pub trait Element: Copy + PartialOrd + Default + 'static {
    /// The runtime dtype tag for this element type.
    const DTYPE: Dtype;

    /// Append the little-endian encoding of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one element from a little-endian byte slice of exactly
    /// [`Dtype::size_bytes`] bytes.
    fn read_le(src: &[u8]) -> Self;
}

macro_rules! impl_element_multi {
    ($t:ty, $dtype:expr, $read:ident, $write:ident, $size:expr) => {
        impl Element for $t {
            const DTYPE: Dtype = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                let mut buf = [0u8; $size];
                LittleEndian::$write(&mut buf, self);
                out.extend_from_slice(&buf);
            }

            fn read_le(src: &[u8]) -> Self {
                LittleEndian::$read(src)
            }
        }
    };
}

impl Element for u8 {
    const DTYPE: Dtype = Dtype::U8;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self);
    }

    fn read_le(src: &[u8]) -> Self {
        src[0]
    }
}

impl Element for i8 {
    const DTYPE: Dtype = Dtype::I8;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_le(src: &[u8]) -> Self {
        src[0] as i8
    }
}

impl_element_multi!(u16, Dtype::U16, read_u16, write_u16, 2);
impl_element_multi!(i16, Dtype::I16, read_i16, write_i16, 2);
impl_element_multi!(u32, Dtype::U32, read_u32, write_u32, 4);
impl_element_multi!(i32, Dtype::I32, read_i32, write_i32, 4);
impl_element_multi!(f32, Dtype::F32, read_f32, write_f32, 4);
impl_element_multi!(f64, Dtype::F64, read_f64, write_f64, 8);

/// A dtype-tagged n-dimensional array.
///
/// The first axis is the item axis wherever an `ArrayValue` represents a
/// collection of items; a single packet is a plain 3-axis value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// `uint8` payload
    U8(ArrayD<u8>),
    /// `int8` payload
    I8(ArrayD<i8>),
    /// `uint16` payload
    U16(ArrayD<u16>),
    /// `int16` payload
    I16(ArrayD<i16>),
    /// `uint32` payload
    U32(ArrayD<u32>),
    /// `int32` payload
    I32(ArrayD<i32>),
    /// `float32` payload
    F32(ArrayD<f32>),
    /// `float64` payload
    F64(ArrayD<f64>),
}

/// Run `$body` with `$arr` bound to the typed inner array.
macro_rules! dispatch {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            ArrayValue::U8($arr) => $body,
            ArrayValue::I8($arr) => $body,
            ArrayValue::U16($arr) => $body,
            ArrayValue::I16($arr) => $body,
            ArrayValue::U32($arr) => $body,
            ArrayValue::I32($arr) => $body,
            ArrayValue::F32($arr) => $body,
            ArrayValue::F64($arr) => $body,
        }
    };
}

/// Like `dispatch!` but rewraps the result of `$body` in the same variant.
macro_rules! dispatch_map {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            ArrayValue::U8($arr) => ArrayValue::U8($body),
            ArrayValue::I8($arr) => ArrayValue::I8($body),
            ArrayValue::U16($arr) => ArrayValue::U16($body),
            ArrayValue::I16($arr) => ArrayValue::I16($body),
            ArrayValue::U32($arr) => ArrayValue::U32($body),
            ArrayValue::I32($arr) => ArrayValue::I32($body),
            ArrayValue::F32($arr) => ArrayValue::F32($body),
            ArrayValue::F64($arr) => ArrayValue::F64($body),
        }
    };
}

fn decode<T: Element>(shape: &[usize], bytes: &[u8]) -> Result<ArrayD<T>, ArrayError> {
    let size = T::DTYPE.size_bytes();
    let values: Vec<T> = bytes.chunks_exact(size).map(T::read_le).collect();
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| ArrayError::ByteLength {
        expected: shape.iter().product::<usize>() * size,
        actual: bytes.len(),
        dtype: T::DTYPE,
        shape: shape.to_vec(),
    })
}

impl ArrayValue {
    /// An all-default (zero) value of the given dtype and shape.
    pub fn zeros(dtype: Dtype, shape: &[usize]) -> ArrayValue {
        let dim = IxDyn(shape);
        match dtype {
            Dtype::U8 => ArrayValue::U8(ArrayD::default(dim)),
            Dtype::I8 => ArrayValue::I8(ArrayD::default(dim)),
            Dtype::U16 => ArrayValue::U16(ArrayD::default(dim)),
            Dtype::I16 => ArrayValue::I16(ArrayD::default(dim)),
            Dtype::U32 => ArrayValue::U32(ArrayD::default(dim)),
            Dtype::I32 => ArrayValue::I32(ArrayD::default(dim)),
            Dtype::F32 => ArrayValue::F32(ArrayD::default(dim)),
            Dtype::F64 => ArrayValue::F64(ArrayD::default(dim)),
        }
    }

    /// The element type tag.
    pub fn dtype(&self) -> Dtype {
        match self {
            ArrayValue::U8(_) => Dtype::U8,
            ArrayValue::I8(_) => Dtype::I8,
            ArrayValue::U16(_) => Dtype::U16,
            ArrayValue::I16(_) => Dtype::I16,
            ArrayValue::U32(_) => Dtype::U32,
            ArrayValue::I32(_) => Dtype::I32,
            ArrayValue::F32(_) => Dtype::F32,
            ArrayValue::F64(_) => Dtype::F64,
        }
    }

    /// Full shape, item axis first.
    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        dispatch!(self, a => a.ndim())
    }

    /// Number of items (length of the first axis; 0 for a 0-axis value).
    pub fn num_items(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Shape of a single item (everything after the item axis).
    pub fn item_shape(&self) -> &[usize] {
        let shape = self.shape();
        if shape.is_empty() {
            shape
        } else {
            &shape[1..]
        }
    }

    /// Copy of the items in `start..end` along the item axis.
    ///
    /// Empty ranges are valid and yield a zero-item array.
    pub fn slice_items(&self, start: usize, end: usize) -> Result<ArrayValue, ArrayError> {
        let len = self.num_items();
        if start > end || end > len {
            return Err(ArrayError::ItemRange { start, end, len });
        }
        Ok(dispatch_map!(self, a => a
            .slice_axis(Axis(0), Slice::from(start..end))
            .to_owned()))
    }

    /// Copy of the items at `indices`, in the given order.
    pub fn select_items(&self, indices: &[usize]) -> ArrayValue {
        dispatch_map!(self, a => a.select(Axis(0), indices))
    }

    /// Prepend an item axis of length 1, turning a single item into a
    /// one-item collection.
    pub fn expand_item(&self) -> ArrayValue {
        dispatch_map!(self, a => a.clone().insert_axis(Axis(0)))
    }

    /// Grow this collection by the items of `other`.
    ///
    /// Fails if dtypes or per-item shapes disagree.
    pub fn append_items(&mut self, other: &ArrayValue) -> Result<(), ArrayError> {
        if self.dtype() != other.dtype() {
            return Err(ArrayError::DtypeMismatch {
                expected: self.dtype(),
                actual: other.dtype(),
            });
        }
        if self.item_shape() != other.item_shape() {
            return Err(ArrayError::ItemShapeMismatch {
                expected: self.item_shape().to_vec(),
                actual: other.item_shape().to_vec(),
            });
        }
        macro_rules! concat_pair {
            ($($variant:ident),+) => {
                match (&*self, other) {
                    $((ArrayValue::$variant(a), ArrayValue::$variant(b)) => {
                        ArrayValue::$variant(
                            concatenate(Axis(0), &[a.view(), b.view()]).map_err(|_| {
                                ArrayError::ItemShapeMismatch {
                                    expected: a.shape()[1..].to_vec(),
                                    actual: b.shape()[1..].to_vec(),
                                }
                            })?,
                        )
                    })+
                    // dtype equality was checked above
                    _ => {
                        return Err(ArrayError::DtypeMismatch {
                            expected: self.dtype(),
                            actual: other.dtype(),
                        })
                    }
                }
            };
        }
        *self = concat_pair!(U8, I8, U16, I16, U32, I32, F32, F64);
        Ok(())
    }

    /// Element-wise conversion to another dtype (numeric `as` semantics).
    pub fn cast(&self, dtype: Dtype) -> ArrayValue {
        macro_rules! cast_arr {
            ($a:expr) => {
                match dtype {
                    Dtype::U8 => ArrayValue::U8($a.mapv(|v| v as u8)),
                    Dtype::I8 => ArrayValue::I8($a.mapv(|v| v as i8)),
                    Dtype::U16 => ArrayValue::U16($a.mapv(|v| v as u16)),
                    Dtype::I16 => ArrayValue::I16($a.mapv(|v| v as i16)),
                    Dtype::U32 => ArrayValue::U32($a.mapv(|v| v as u32)),
                    Dtype::I32 => ArrayValue::I32($a.mapv(|v| v as i32)),
                    Dtype::F32 => ArrayValue::F32($a.mapv(|v| v as f32)),
                    Dtype::F64 => ArrayValue::F64($a.mapv(|v| v as f64)),
                }
            };
        }
        dispatch!(self, a => cast_arr!(a))
    }

    /// Element-wise maximum along `axis`, removing that axis.
    ///
    /// Lanes of length zero reduce to the element default.
    pub fn max_axis(&self, axis: usize) -> Result<ArrayValue, ArrayError> {
        if axis >= self.ndim() {
            return Err(ArrayError::AxisOutOfBounds {
                axis,
                shape: self.shape().to_vec(),
            });
        }
        Ok(dispatch_map!(self, a => a.map_axis(Axis(axis), |lane| {
            lane.iter()
                .copied()
                .reduce(|m, v| if v > m { v } else { m })
                .unwrap_or_default()
        })))
    }

    /// Row-major little-endian encoding of all elements.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        dispatch!(self, a => {
            let mut out = Vec::with_capacity(a.len() * self.dtype().size_bytes());
            for &v in a.iter() {
                v.write_le(&mut out);
            }
            out
        })
    }

    /// Decode a row-major little-endian buffer into a value of the given
    /// dtype and shape. The buffer must hold exactly the right byte count.
    pub fn from_le_bytes(dtype: Dtype, shape: &[usize], bytes: &[u8]) -> Result<ArrayValue, ArrayError> {
        let expected = shape.iter().product::<usize>() * dtype.size_bytes();
        if bytes.len() != expected {
            return Err(ArrayError::ByteLength {
                expected,
                actual: bytes.len(),
                dtype,
                shape: shape.to_vec(),
            });
        }
        Ok(match dtype {
            Dtype::U8 => ArrayValue::U8(decode(shape, bytes)?),
            Dtype::I8 => ArrayValue::I8(decode(shape, bytes)?),
            Dtype::U16 => ArrayValue::U16(decode(shape, bytes)?),
            Dtype::I16 => ArrayValue::I16(decode(shape, bytes)?),
            Dtype::U32 => ArrayValue::U32(decode(shape, bytes)?),
            Dtype::I32 => ArrayValue::I32(decode(shape, bytes)?),
            Dtype::F32 => ArrayValue::F32(decode(shape, bytes)?),
            Dtype::F64 => ArrayValue::F64(decode(shape, bytes)?),
        })
    }

    /// Build a value from a flat element vector (row-major).
    pub fn from_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<ArrayValue, ArrayError>
    where
        ArrayD<T>: Into<ArrayValue>,
    {
        let actual = values.len() * T::DTYPE.size_bytes();
        let arr = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| ArrayError::ByteLength {
            expected: shape.iter().product::<usize>() * T::DTYPE.size_bytes(),
            actual,
            dtype: T::DTYPE,
            shape: shape.to_vec(),
        })?;
        Ok(arr.into())
    }
}

macro_rules! impl_from_arrayd {
    ($($t:ty => $variant:ident),+ $(,)?) => {
        $(impl From<ArrayD<$t>> for ArrayValue {
            fn from(arr: ArrayD<$t>) -> Self {
                ArrayValue::$variant(arr)
            }
        })+
    };
}

impl_from_arrayd!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    f32 => F32,
    f64 => F64,
);
