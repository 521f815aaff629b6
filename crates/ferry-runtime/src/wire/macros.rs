//! Codec implementations for records and tagged unions
//!
//! Both macros list fields in wire order. Reordering fields or renumbering
//! tags changes the protocol and needs a contract version bump.

/// Implement [`WireCodec`](crate::wire::WireCodec) for a record
///
/// ```
/// use ferry_runtime::impl_wire_record;
///
/// #[derive(Debug, PartialEq)]
/// pub struct Proof {
///     pub amount: u64,
///     pub secret: String,
/// }
///
/// impl_wire_record!(Proof { amount, secret });
/// ```
#[macro_export]
macro_rules! impl_wire_record {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl $crate::wire::WireCodec for $name {
            #[allow(unused_variables)]
            fn write(&self, buf: &mut Vec<u8>) {
                $( $crate::wire::WireCodec::write(&self.$field, buf); )*
            }

            #[allow(unused_variables)]
            fn read(buf: &mut &[u8]) -> Result<Self, $crate::wire::CodecError> {
                Ok($name {
                    $( $field: $crate::wire::WireCodec::read(buf)?, )*
                })
            }
        }
    };
}

/// Implement [`WireCodec`](crate::wire::WireCodec) for an enum
///
/// Each variant is given its explicit 1-based tag; variants are either
/// unit-like or struct-like.
///
/// ```
/// use ferry_runtime::impl_wire_enum;
///
/// #[derive(Debug, PartialEq)]
/// pub enum Unit {
///     Sat,
///     Custom { name: String },
/// }
///
/// impl_wire_enum!(Unit {
///     1 => Sat,
///     2 => Custom { name },
/// });
/// ```
#[macro_export]
macro_rules! impl_wire_enum {
    ($name:ident { $($tag:literal => $variant:ident $({ $($field:ident),* $(,)? })?),+ $(,)? }) => {
        impl $crate::wire::WireCodec for $name {
            fn write(&self, buf: &mut Vec<u8>) {
                match self {
                    $(
                        $name::$variant $({ $($field),* })? => {
                            $crate::wire::WireCodec::write(&($tag as i32), buf);
                            $($( $crate::wire::WireCodec::write($field, buf); )*)?
                        }
                    )+
                }
            }

            fn read(buf: &mut &[u8]) -> Result<Self, $crate::wire::CodecError> {
                let tag = <i32 as $crate::wire::WireCodec>::read(buf)?;
                match tag {
                    $(
                        $tag => Ok($name::$variant $({
                            $( $field: $crate::wire::WireCodec::read(buf)?, )*
                        })?),
                    )+
                    other => Err($crate::wire::CodecError::UnknownVariant {
                        type_name: stringify!($name),
                        tag: other,
                    }),
                }
            }
        }
    };
}
