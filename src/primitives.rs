use crate::signature::{
    TY_BYTE, TY_DOUBLE, TY_INT16, TY_INT32, TY_INT64, TY_UINT16, TY_UINT32, TY_UINT64,
};

use byteorder::ByteOrder;
use std::mem::size_of;

/// Fixed-size numbers as they sit on the wire. Their alignment is always
/// their size.
pub(crate) trait DbusPrimitive: Copy {
    fn signature() -> u8;
    fn size() -> usize;
    fn write<B: ByteOrder>(self, out: &mut [u8]);
    fn read<B: ByteOrder>(input: &[u8]) -> Self;

    fn alignment() -> usize {
        Self::size()
    }
}

macro_rules! basic_primitive {
    ($type:ident, $sig:expr, $write:ident, $read:ident) => {
        impl DbusPrimitive for $type {
            fn signature() -> u8 {
                $sig
            }

            fn size() -> usize {
                size_of::<$type>()
            }

            fn write<B: ByteOrder>(self, out: &mut [u8]) {
                B::$write(out, self);
            }

            fn read<B: ByteOrder>(input: &[u8]) -> Self {
                B::$read(input)
            }
        }
    };
}

basic_primitive!(i16, TY_INT16, write_i16, read_i16);
basic_primitive!(u16, TY_UINT16, write_u16, read_u16);
basic_primitive!(i32, TY_INT32, write_i32, read_i32);
basic_primitive!(u32, TY_UINT32, write_u32, read_u32);
basic_primitive!(i64, TY_INT64, write_i64, read_i64);
basic_primitive!(u64, TY_UINT64, write_u64, read_u64);
basic_primitive!(f64, TY_DOUBLE, write_f64, read_f64);

impl DbusPrimitive for u8 {
    fn signature() -> u8 {
        TY_BYTE
    }

    fn size() -> usize {
        1
    }

    fn write<B: ByteOrder>(self, out: &mut [u8]) {
        out[0] = self;
    }

    fn read<B: ByteOrder>(input: &[u8]) -> Self {
        input[0]
    }
}
