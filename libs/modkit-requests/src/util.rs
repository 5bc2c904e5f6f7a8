//! Small value helpers shared by the builder.

/// Returns `a` unless it is the zero value of `T`, in which case returns `b`.
///
/// Used to fall back to defaults for unset builder fields, e.g.
/// `first(scheme, "https")`.
#[must_use]
pub fn first<T: Default + PartialEq>(a: T, b: T) -> T {
    if a == T::default() { b } else { a }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_first_prefers_non_zero() {
        assert_eq!(first("http", "https"), "http");
        assert_eq!(first("", "https"), "https");
        assert_eq!(first(0, 7), 7);
        assert_eq!(first(3, 7), 3);
        assert_eq!(first(String::new(), "GET".to_owned()), "GET");
    }
}
