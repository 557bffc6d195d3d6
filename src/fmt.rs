//! Debug formatting helpers for [`custom_debug_derive`].

use std::fmt;

/// Formats a secret `Option<String>` without revealing it.
///
/// Use with `#[debug(with = "crate::fmt::redacted")]`.
pub fn redacted(value: &Option<String>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Some(_) => f.write_str("<redacted>"),
        None => f.write_str("None"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Wrapper(Option<String>);

    impl fmt::Debug for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            redacted(&self.0, f)
        }
    }

    #[test]
    fn test_redacted() {
        assert_eq!(format!("{:?}", Wrapper(Some("hunter2".into()))), "<redacted>");
        assert_eq!(format!("{:?}", Wrapper(None)), "None");
    }
}
