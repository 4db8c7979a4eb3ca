//! JVM value types and the integer sub-range lattice used by type inference.
//!
//! A [`VarType`] is a [`TypeCode`] plus an array dimension and, for reference
//! types, the internal class name. Besides the real JVM types the code set
//! contains analysis-only placeholders:
//!
//! - [`TypeCode::ByteChar`] - an integer known to fit `0..=127` (fits byte and char)
//! - [`TypeCode::ShortChar`] - an integer known to fit `0..=32767` (fits short and char)
//! - [`TypeCode::Null`] - the type of `null`, below every reference type
//! - [`TypeCode::Address`] - a `jsr` return address
//! - [`TypeCode::Group2Empty`] - the upper half of a category-2 stack value
//!
//! # Lattice
//!
//! The integer family forms a small lattice:
//!
//! ```text
//!             int
//!            /   \
//!        short    char
//!        /   \    /
//!     byte  shortchar
//!        \    /
//!       bytechar
//! ```
//!
//! [`VarType::join`] returns the smallest type containing both operands,
//! [`VarType::meet`] the largest type contained in both. Reference types join
//! to `java/lang/Object` and meet at `null`. Values of different families
//! never join.

use std::fmt;

use strum::{Display, EnumIter};

use crate::{Error, Result};

/// Internal name of the root class.
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// The base code of a type, without array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum TypeCode {
    /// `byte`
    Byte,
    /// `char`
    Char,
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int`
    Int,
    /// `long`
    Long,
    /// `short`
    Short,
    /// `boolean`
    Boolean,
    /// A class or interface type
    Object,
    /// `jsr` return address
    Address,
    /// `void`
    Void,
    /// Second slot of a long or double
    #[strum(serialize = "<group2empty>")]
    Group2Empty,
    /// The null type
    Null,
    /// Integer constant in `0..=127`
    #[strum(serialize = "<bytechar>")]
    ByteChar,
    /// Integer constant in `0..=32767`
    #[strum(serialize = "<shortchar>")]
    ShortChar,
    /// Not yet known
    #[strum(serialize = "<unknown>")]
    Unknown,
}

/// Ordered type families. Minimum types only move to a higher family,
/// maximum types only to a lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum TypeFamily {
    /// Unknown, `void`, addresses
    Unknown,
    /// `boolean`
    Boolean,
    /// `byte`, `char`, `short`, `int` and the placeholders between them
    Integer,
    /// `float`
    Float,
    /// `long`
    Long,
    /// `double`
    Double,
    /// References, arrays and `null`
    Object,
}

/// A value type: base code, array dimension and optional class name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarType {
    /// Base type code; for arrays, the element's code
    pub code: TypeCode,
    /// Number of array dimensions, 0 for scalars
    pub array_dim: u32,
    /// Internal class name for [`TypeCode::Object`]
    pub class_name: Option<String>,
}

/// The integer sub-range lattice, ordered so that a forward scan finds the
/// least upper bound and a backward scan the greatest lower bound.
const INTEGER_CHAIN: [TypeCode; 6] = [
    TypeCode::ByteChar,
    TypeCode::Byte,
    TypeCode::ShortChar,
    TypeCode::Short,
    TypeCode::Char,
    TypeCode::Int,
];

macro_rules! primitive_consts {
    ($($name:ident => $code:ident),* $(,)?) => {
        $(
            #[allow(missing_docs)]
            pub const $name: VarType = VarType {
                code: TypeCode::$code,
                array_dim: 0,
                class_name: None,
            };
        )*
    };
}

impl VarType {
    primitive_consts! {
        BYTE => Byte,
        CHAR => Char,
        DOUBLE => Double,
        FLOAT => Float,
        INT => Int,
        LONG => Long,
        SHORT => Short,
        BOOLEAN => Boolean,
        ADDRESS => Address,
        VOID => Void,
        GROUP2EMPTY => Group2Empty,
        NULL => Null,
        BYTECHAR => ByteChar,
        SHORTCHAR => ShortChar,
        UNKNOWN => Unknown,
    }

    /// Creates a scalar type from a code.
    #[must_use]
    pub const fn primitive(code: TypeCode) -> Self {
        VarType {
            code,
            array_dim: 0,
            class_name: None,
        }
    }

    /// Creates a class type from an internal name such as `java/lang/String`.
    #[must_use]
    pub fn object(class_name: &str) -> Self {
        VarType {
            code: TypeCode::Object,
            array_dim: 0,
            class_name: Some(class_name.to_string()),
        }
    }

    /// `java/lang/Object`.
    #[must_use]
    pub fn root_object() -> Self {
        Self::object(OBJECT_CLASS)
    }

    /// Returns this type with `dims` additional array dimensions.
    #[must_use]
    pub fn array_of(&self, dims: u32) -> Self {
        VarType {
            array_dim: self.array_dim + dims,
            ..self.clone()
        }
    }

    /// Element type of an array, `None` for scalars.
    #[must_use]
    pub fn element_type(&self) -> Option<Self> {
        (self.array_dim > 0).then(|| VarType {
            array_dim: self.array_dim - 1,
            ..self.clone()
        })
    }

    /// Parses a field descriptor such as `I`, `[J` or `Ljava/lang/String;`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] for an empty, truncated or trailing descriptor.
    pub fn from_descriptor(descriptor: &str) -> Result<Self> {
        let (ty, rest) = parse_field_type(descriptor)?;
        if !rest.is_empty() {
            return Err(Error::TypeError(format!(
                "Trailing characters in descriptor '{descriptor}'"
            )));
        }
        Ok(ty)
    }

    /// Number of stack or local slots the value occupies.
    #[must_use]
    pub fn stack_size(&self) -> u16 {
        if self.array_dim > 0 {
            return 1;
        }
        match self.code {
            TypeCode::Long | TypeCode::Double => 2,
            TypeCode::Void => 0,
            _ => 1,
        }
    }

    /// The family this type belongs to.
    #[must_use]
    pub fn family(&self) -> TypeFamily {
        if self.array_dim > 0 {
            return TypeFamily::Object;
        }
        match self.code {
            TypeCode::Boolean => TypeFamily::Boolean,
            TypeCode::Byte
            | TypeCode::Char
            | TypeCode::Short
            | TypeCode::Int
            | TypeCode::ByteChar
            | TypeCode::ShortChar => TypeFamily::Integer,
            TypeCode::Float => TypeFamily::Float,
            TypeCode::Long => TypeFamily::Long,
            TypeCode::Double => TypeFamily::Double,
            TypeCode::Object | TypeCode::Null => TypeFamily::Object,
            TypeCode::Address | TypeCode::Void | TypeCode::Group2Empty | TypeCode::Unknown => {
                TypeFamily::Unknown
            }
        }
    }

    /// Returns `true` for class and array types (not `null`).
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.array_dim > 0 || self.code == TypeCode::Object
    }

    /// Returns `true` for `java/lang/Object` without array dimension.
    #[must_use]
    pub fn is_root_object(&self) -> bool {
        self.array_dim == 0
            && self.code == TypeCode::Object
            && self.class_name.as_deref() == Some(OBJECT_CLASS)
    }

    /// Returns `true` for the analysis-only integer placeholders and `null`.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.array_dim == 0
            && matches!(
                self.code,
                TypeCode::ByteChar | TypeCode::ShortChar | TypeCode::Null
            )
    }

    /// `self ⊇ other`.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        self == other || self.is_strict_superset(other)
    }

    /// `self ⊋ other`.
    ///
    /// Every known type is a strict superset of `unknown`; `boolean` sits below
    /// `bytechar` so constants `0`/`1` may widen into the integer chain.
    #[must_use]
    pub fn is_strict_superset(&self, other: &Self) -> bool {
        if self == other {
            return false;
        }
        if other.code == TypeCode::Unknown && other.array_dim == 0 {
            return self.code != TypeCode::Unknown || self.array_dim > 0;
        }
        if other.array_dim > 0 {
            return self.is_root_object();
        }
        if self.array_dim > 0 {
            return other.code == TypeCode::Null;
        }
        match self.code {
            TypeCode::Object => {
                other.code == TypeCode::Null
                    || (self.is_root_object() && other.code == TypeCode::Object)
            }
            code if INTEGER_CHAIN.contains(&code) => {
                other.code == TypeCode::Boolean || integer_contains(code, other.code)
            }
            _ => false,
        }
    }

    /// Least upper bound, or `None` if the types are unrelated.
    #[must_use]
    pub fn join(&self, other: &Self) -> Option<Self> {
        if self.is_superset(other) {
            return Some(self.clone());
        }
        if other.is_superset(self) {
            return Some(other.clone());
        }
        if self.family() != other.family() {
            return None;
        }
        match self.family() {
            TypeFamily::Integer => INTEGER_CHAIN
                .iter()
                .find(|&&c| integer_contains(c, self.code) && integer_contains(c, other.code))
                .map(|&c| VarType::primitive(c)),
            TypeFamily::Object => Some(VarType::root_object()),
            _ => None,
        }
    }

    /// Greatest lower bound, or `None` if the types are unrelated.
    #[must_use]
    pub fn meet(&self, other: &Self) -> Option<Self> {
        if self.is_superset(other) {
            return Some(other.clone());
        }
        if other.is_superset(self) {
            return Some(self.clone());
        }
        if self.family() != other.family() {
            return None;
        }
        match self.family() {
            TypeFamily::Integer => INTEGER_CHAIN
                .iter()
                .rev()
                .find(|&&c| integer_contains(self.code, c) && integer_contains(other.code, c))
                .map(|&c| VarType::primitive(c)),
            TypeFamily::Object => Some(VarType::NULL),
            _ => None,
        }
    }

    /// Smallest type able to hold the integer constant `value`.
    ///
    /// `0` and `1` are reported as `boolean` when `bool_permitted` is set.
    #[must_use]
    pub fn of_int_constant(value: i32, bool_permitted: bool) -> Self {
        match value {
            0 | 1 if bool_permitted => VarType::BOOLEAN,
            0..=127 => VarType::BYTECHAR,
            -128..=-1 => VarType::BYTE,
            128..=32767 => VarType::SHORTCHAR,
            32768..=65535 => VarType::CHAR,
            -32768..=-129 => VarType::SHORT,
            _ => VarType::INT,
        }
    }
}

impl TypeFamily {
    /// Smallest type of the family, the starting point of a minimum bound.
    #[must_use]
    pub fn min_type(self) -> VarType {
        match self {
            TypeFamily::Unknown => VarType::UNKNOWN,
            TypeFamily::Boolean => VarType::BOOLEAN,
            TypeFamily::Integer => VarType::BYTECHAR,
            TypeFamily::Float => VarType::FLOAT,
            TypeFamily::Long => VarType::LONG,
            TypeFamily::Double => VarType::DOUBLE,
            TypeFamily::Object => VarType::NULL,
        }
    }
}

/// `outer ⊇ inner` within the integer chain (reflexive).
fn integer_contains(outer: TypeCode, inner: TypeCode) -> bool {
    use TypeCode::{Byte, ByteChar, Char, Int, Short, ShortChar};
    match outer {
        Int => matches!(inner, Int | Short | Char | Byte | ShortChar | ByteChar),
        Short => matches!(inner, Short | Byte | ShortChar | ByteChar),
        Char => matches!(inner, Char | ShortChar | ByteChar),
        Byte => matches!(inner, Byte | ByteChar),
        ShortChar => matches!(inner, ShortChar | ByteChar),
        ByteChar => inner == ByteChar,
        _ => false,
    }
}

fn parse_field_type(descriptor: &str) -> Result<(VarType, &str)> {
    let dims = descriptor.bytes().take_while(|&b| b == b'[').count();
    let rest = &descriptor[dims..];
    let mut chars = rest.chars();
    let code = match chars.next() {
        Some('B') => TypeCode::Byte,
        Some('C') => TypeCode::Char,
        Some('D') => TypeCode::Double,
        Some('F') => TypeCode::Float,
        Some('I') => TypeCode::Int,
        Some('J') => TypeCode::Long,
        Some('S') => TypeCode::Short,
        Some('Z') => TypeCode::Boolean,
        Some('V') if dims == 0 => TypeCode::Void,
        Some('L') => {
            let body = &rest[1..];
            let end = body.find(';').ok_or_else(|| {
                Error::TypeError(format!("Unterminated class descriptor '{descriptor}'"))
            })?;
            let ty = VarType::object(&body[..end]).array_of(dims as u32);
            return Ok((ty, &body[end + 1..]));
        }
        _ => {
            return Err(Error::TypeError(format!(
                "Invalid type descriptor '{descriptor}'"
            )))
        }
    };
    Ok((
        VarType::primitive(code).array_of(dims as u32),
        chars.as_str(),
    ))
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.class_name) {
            (TypeCode::Object, Some(name)) => write!(f, "{name}")?,
            (code, _) => write!(f, "{code}")?,
        }
        for _ in 0..self.array_dim {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<VarType>,
    /// Return type, [`VarType::VOID`] for `V`
    pub ret: VarType,
}

impl MethodDescriptor {
    /// Parses a descriptor such as `(IJLjava/lang/String;)V`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] if the descriptor is not well formed.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let inner = descriptor
            .strip_prefix('(')
            .ok_or_else(|| Error::TypeError(format!("Missing '(' in '{descriptor}'")))?;
        let close = inner
            .find(')')
            .ok_or_else(|| Error::TypeError(format!("Missing ')' in '{descriptor}'")))?;

        let mut params = Vec::new();
        let mut rest = &inner[..close];
        while !rest.is_empty() {
            let (ty, tail) = parse_field_type(rest)?;
            if ty.code == TypeCode::Void {
                return Err(Error::TypeError(format!(
                    "void parameter in '{descriptor}'"
                )));
            }
            params.push(ty);
            rest = tail;
        }
        let ret = VarType::from_descriptor(&inner[close + 1..])?;
        Ok(MethodDescriptor { params, ret })
    }

    /// Total number of local slots taken by the parameters (without `this`).
    #[must_use]
    pub fn params_stack_size(&self) -> u16 {
        self.params.iter().map(VarType::stack_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_parsing() {
        assert_eq!(VarType::from_descriptor("I").unwrap(), VarType::INT);
        let arr = VarType::from_descriptor("[[J").unwrap();
        assert_eq!(arr.code, TypeCode::Long);
        assert_eq!(arr.array_dim, 2);
        assert_eq!(arr.stack_size(), 1);
        let s = VarType::from_descriptor("Ljava/lang/String;").unwrap();
        assert_eq!(s.class_name.as_deref(), Some("java/lang/String"));
        assert!(VarType::from_descriptor("Ljava/lang/String").is_err());
        assert!(VarType::from_descriptor("II").is_err());
        assert!(VarType::from_descriptor("").is_err());
    }

    #[test]
    fn test_method_descriptor() {
        let md = MethodDescriptor::parse("(IJ[Ljava/lang/Object;D)Z").unwrap();
        assert_eq!(md.params.len(), 4);
        assert_eq!(md.params_stack_size(), 1 + 2 + 1 + 2);
        assert_eq!(md.ret, VarType::BOOLEAN);
        assert!(MethodDescriptor::parse("(V)V").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
    }

    #[test]
    fn test_integer_join() {
        assert_eq!(VarType::BYTE.join(&VarType::CHAR), Some(VarType::INT));
        assert_eq!(VarType::SHORT.join(&VarType::CHAR), Some(VarType::INT));
        assert_eq!(VarType::BYTECHAR.join(&VarType::BYTE), Some(VarType::BYTE));
        assert_eq!(
            VarType::BYTECHAR.join(&VarType::SHORTCHAR),
            Some(VarType::SHORTCHAR)
        );
        assert_eq!(VarType::BYTE.join(&VarType::SHORTCHAR), Some(VarType::SHORT));
        assert_eq!(VarType::INT.join(&VarType::LONG), None);
    }

    #[test]
    fn test_integer_meet() {
        assert_eq!(VarType::SHORT.meet(&VarType::CHAR), Some(VarType::SHORTCHAR));
        assert_eq!(VarType::BYTE.meet(&VarType::CHAR), Some(VarType::BYTECHAR));
        assert_eq!(VarType::INT.meet(&VarType::BYTE), Some(VarType::BYTE));
    }

    #[test]
    fn test_reference_lattice() {
        let string = VarType::object("java/lang/String");
        let list = VarType::object("java/util/List");
        assert_eq!(string.join(&list), Some(VarType::root_object()));
        assert_eq!(string.meet(&list), Some(VarType::NULL));
        assert!(string.is_strict_superset(&VarType::NULL));
        assert!(VarType::root_object().is_strict_superset(&VarType::INT.array_of(1)));
        assert!(!string.is_superset(&VarType::INT.array_of(1)));
        assert_eq!(VarType::NULL.join(&string), Some(string.clone()));
    }

    #[test]
    fn test_constant_ranges() {
        assert_eq!(VarType::of_int_constant(1, true), VarType::BOOLEAN);
        assert_eq!(VarType::of_int_constant(1, false), VarType::BYTECHAR);
        assert_eq!(VarType::of_int_constant(-5, false), VarType::BYTE);
        assert_eq!(VarType::of_int_constant(300, false), VarType::SHORTCHAR);
        assert_eq!(VarType::of_int_constant(40000, false), VarType::CHAR);
        assert_eq!(VarType::of_int_constant(-300, false), VarType::SHORT);
        assert_eq!(VarType::of_int_constant(1 << 20, false), VarType::INT);
    }

    #[test]
    fn test_display() {
        assert_eq!(VarType::INT.array_of(2).to_string(), "int[][]");
        assert_eq!(VarType::object("a/B").to_string(), "a/B");
        assert_eq!(VarType::BYTECHAR.to_string(), "<bytechar>");
    }
}
