//! Cache Key Naming
//!
//! Keys are built from a base name, positional parts joined with `/`, and
//! named parameters appended as `&name=value` in sorted name order, so the
//! same request always maps to the same key regardless of argument order.
//! Only scalar parts are accepted; `None` parts are skipped. Floats always
//! carry a decimal point and booleans render as `True`/`False`, so keys match
//! the ones already stored by earlier writers of the same cache files.

use std::collections::BTreeMap;
use std::fmt::Display;

/// A value that may appear in a cache key
pub trait KeyPart {
    /// Rendered form, or `None` to leave the part out
    fn key_part(&self) -> Option<String>;
}

macro_rules! display_key_part {
    ($($t:ty),* $(,)?) => {
        $(
            impl KeyPart for $t {
                fn key_part(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

display_key_part!(
    i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, char, str, String
);

impl KeyPart for f32 {
    fn key_part(&self) -> Option<String> {
        Some(format!("{:?}", self))
    }
}

impl KeyPart for f64 {
    fn key_part(&self) -> Option<String> {
        Some(format!("{:?}", self))
    }
}

impl KeyPart for bool {
    fn key_part(&self) -> Option<String> {
        Some(if *self { "True" } else { "False" }.to_string())
    }
}

impl<T: KeyPart + ?Sized> KeyPart for &T {
    fn key_part(&self) -> Option<String> {
        (**self).key_part()
    }
}

impl<T: KeyPart> KeyPart for Option<T> {
    fn key_part(&self) -> Option<String> {
        self.as_ref().and_then(KeyPart::key_part)
    }
}

/// Builder for deterministic cache keys
///
/// # Example
/// ```
/// use tiercache::CacheKey;
///
/// let key = CacheKey::new("tmdb")
///     .part("movie")
///     .part(603)
///     .param("language", "en")
///     .param("append", Option::<&str>::None)
///     .build();
/// assert_eq!(key, "tmdb/movie/603&language=en");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheKey {
    name: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(base: impl Display) -> Self {
        Self {
            name: base.to_string(),
            params: BTreeMap::new(),
        }
    }

    /// Append a positional part
    pub fn part(mut self, part: impl KeyPart) -> Self {
        if let Some(part) = part.key_part() {
            if self.name.is_empty() {
                self.name = part;
            } else {
                self.name.push('/');
                self.name.push_str(&part);
            }
        }
        self
    }

    /// Add a named parameter; a later value for the same name replaces the earlier one
    pub fn param(mut self, name: &str, value: impl KeyPart) -> Self {
        if let Some(value) = value.key_part() {
            self.params.insert(name.to_string(), value);
        }
        self
    }

    pub fn build(self) -> String {
        let mut key = self.name;
        for (name, value) in self.params {
            if !key.is_empty() {
                key.push('&');
            }
            key.push_str(&name);
            key.push('=');
            key.push_str(&value);
        }
        key
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_sorted() {
        let a = CacheKey::new("trakt")
            .param("page", 2)
            .param("limit", 20)
            .build();
        let b = CacheKey::new("trakt")
            .param("limit", 20)
            .param("page", 2)
            .build();
        assert_eq!(a, "trakt&limit=20&page=2");
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_base_does_not_lead_with_separator() {
        assert_eq!(CacheKey::new("").part(603).build(), "603");
        assert_eq!(CacheKey::new("").param("id", 7).build(), "id=7");
        assert_eq!(CacheKey::new("").build(), "");
    }

    #[test]
    fn test_none_parts_are_skipped() {
        let season: Option<u32> = None;
        let key = CacheKey::new("tv")
            .part(1399)
            .part(season)
            .part(Some(true))
            .build();
        assert_eq!(key, "tv/1399/True");
    }

    #[test]
    fn test_float_and_bool_rendering() {
        let key = CacheKey::new("search")
            .part(1.0f64)
            .part(2.5f32)
            .param("adult", false)
            .param("score", 7.0)
            .build();
        assert_eq!(key, "search/1.0/2.5&adult=False&score=7.0");
    }
}
