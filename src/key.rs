use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Process-wide identity of a cached function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionKey(Arc<str>);

impl FunctionKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rendering of the key that is safe to use as a file name.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        let mut chars = self.0.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                ':' if chars.peek() == Some(&':') => {
                    chars.next();
                    stem.push('.');
                }
                c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') => stem.push(c),
                _ => stem.push('_'),
            }
        }
        stem
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical, hashable form of a call's arguments.
///
/// Sequences of any container type collapse to `Seq`, so a `Vec` and a tuple
/// holding equal elements produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheKey {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(u64),
    Str(String),
    Seq(Vec<CacheKey>),
}

impl CacheKey {
    pub fn float(value: f64) -> Self {
        // -0.0 == 0.0 and every NaN is the same argument.
        let canonical = if value == 0.0 {
            0.0
        } else if value.is_nan() {
            f64::NAN
        } else {
            value
        };
        Self::Float(canonical.to_bits())
    }

    pub fn unsigned(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(signed) => Self::Int(signed),
            Err(_) => Self::UInt(value),
        }
    }

    pub fn seq<'a, T, I>(items: I) -> Self
    where
        T: ToCacheKey + ?Sized + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        Self::Seq(items.into_iter().map(ToCacheKey::to_cache_key).collect())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Seq(items) => {
                f.write_str("(")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Conversion of call arguments into a [`CacheKey`].
pub trait ToCacheKey {
    fn to_cache_key(&self) -> CacheKey;
}

impl ToCacheKey for CacheKey {
    fn to_cache_key(&self) -> CacheKey {
        self.clone()
    }
}

impl<T: ToCacheKey + ?Sized> ToCacheKey for &T {
    fn to_cache_key(&self) -> CacheKey {
        (**self).to_cache_key()
    }
}

impl<T: ToCacheKey + ?Sized> ToCacheKey for Box<T> {
    fn to_cache_key(&self) -> CacheKey {
        (**self).to_cache_key()
    }
}

impl<T: ToCacheKey + ?Sized> ToCacheKey for Arc<T> {
    fn to_cache_key(&self) -> CacheKey {
        (**self).to_cache_key()
    }
}

impl ToCacheKey for bool {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::Bool(*self)
    }
}

impl ToCacheKey for str {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::Str(self.to_owned())
    }
}

impl ToCacheKey for String {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::Str(self.clone())
    }
}

impl ToCacheKey for f64 {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::float(*self)
    }
}

macro_rules! signed_key {
    ($($ty:ty),*) => {
        $(impl ToCacheKey for $ty {
            fn to_cache_key(&self) -> CacheKey {
                CacheKey::Int(i64::from(*self))
            }
        })*
    };
}

macro_rules! unsigned_key {
    ($($ty:ty),*) => {
        $(impl ToCacheKey for $ty {
            fn to_cache_key(&self) -> CacheKey {
                CacheKey::unsigned(u64::from(*self))
            }
        })*
    };
}

signed_key!(i8, i16, i32, i64);
unsigned_key!(u8, u16, u32, u64);

impl ToCacheKey for usize {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::unsigned(*self as u64)
    }
}

impl<T: ToCacheKey> ToCacheKey for Option<T> {
    fn to_cache_key(&self) -> CacheKey {
        match self {
            Some(value) => value.to_cache_key(),
            None => CacheKey::Null,
        }
    }
}

impl<T: ToCacheKey> ToCacheKey for [T] {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::seq(self)
    }
}

impl<T: ToCacheKey, const N: usize> ToCacheKey for [T; N] {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::seq(self)
    }
}

impl<T: ToCacheKey> ToCacheKey for Vec<T> {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::seq(self)
    }
}

impl<T: ToCacheKey> ToCacheKey for VecDeque<T> {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::seq(self)
    }
}

impl ToCacheKey for () {
    fn to_cache_key(&self) -> CacheKey {
        CacheKey::Seq(Vec::new())
    }
}

macro_rules! tuple_key {
    ($($name:ident),+) => {
        impl<$($name: ToCacheKey),+> ToCacheKey for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_cache_key(&self) -> CacheKey {
                let ($($name,)+) = self;
                CacheKey::Seq(vec![$($name.to_cache_key()),+])
            }
        }
    };
}

tuple_key!(A);
tuple_key!(A, B);
tuple_key!(A, B, C);
tuple_key!(A, B, C, D);
tuple_key!(A, B, C, D, E);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sequences_are_structural() {
        let from_vec = (1u32, vec![vec![2i64, 3], vec![]]).to_cache_key();
        let from_tuple = (1u8, ((2i16, 3i32), ())).to_cache_key();
        assert_eq!(from_vec, from_tuple);
    }

    #[test]
    fn order_is_preserved() {
        assert_ne!(vec![1, 2].to_cache_key(), vec![2, 1].to_cache_key());
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!("abc".to_cache_key(), CacheKey::Str("abc".into()));
        assert_eq!(u64::MAX.to_cache_key(), CacheKey::UInt(u64::MAX));
        assert_eq!(7u64.to_cache_key(), 7i32.to_cache_key());
        assert_eq!(None::<u8>.to_cache_key(), CacheKey::Null);
    }

    #[test]
    fn floats_are_canonicalised() {
        assert_eq!((-0.0f64).to_cache_key(), 0.0f64.to_cache_key());
        assert_eq!(f64::NAN.to_cache_key(), (-f64::NAN).to_cache_key());
        assert_ne!(1.5f64.to_cache_key(), 2.5f64.to_cache_key());
    }

    #[test]
    fn file_stem_replaces_path_hostile_characters() {
        let key = FunctionKey::new("app::f::{{closure}} <x>");
        assert_eq!(key.file_stem(), "app.f.__closure____x_");
    }
}
