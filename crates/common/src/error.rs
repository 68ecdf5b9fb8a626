use std::fmt;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// podshim_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

// ── Aggregate ───────────────────────────────────────────────────────────────

/// A non-empty list of independent failures reported as one error.
///
/// Used by operations that attempt every step regardless of earlier failures,
/// so a retrying caller sees all remaining problems at once.
#[derive(Debug)]
pub struct Aggregate<E> {
    errors: Vec<E>,
}

impl<E> Aggregate<E> {
    /// Returns `None` when `errors` is empty.
    #[must_use]
    pub fn from_errors(errors: Vec<E>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for Aggregate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.errors.as_slice() {
            return write!(f, "{single}");
        }
        f.write_str("[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        f.write_str("]")
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Aggregate<E> {}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum Error {
        #[error("{0}")]
        Message(String),
    }

    impl FromMessage for Error {
        fn from_message(message: String) -> Self {
            Self::Message(message)
        }
    }

    type Result<T> = std::result::Result<T, Error>;

    crate::impl_context!();

    #[test]
    fn empty_aggregate_is_none() {
        assert!(Aggregate::<String>::from_errors(Vec::new()).is_none());
    }

    #[test]
    fn single_error_renders_bare() {
        let agg = Aggregate::from_errors(vec!["boom".to_string()]).unwrap();
        assert_eq!(agg.to_string(), "boom");
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn multiple_errors_render_as_list() {
        let agg = Aggregate::from_errors(vec!["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(agg.to_string(), "[a, b]");
        assert_eq!(agg.into_errors(), vec!["a", "b"]);
    }

    #[test]
    fn context_on_option() {
        let missing: Option<u8> = None;
        let err = missing.context("value missing").unwrap_err();
        assert_eq!(err.to_string(), "value missing");
    }

    #[test]
    fn with_context_on_result() {
        let failed: std::result::Result<u8, std::num::ParseIntError> = "x".parse::<u8>();
        let err = failed.with_context(|| "parse attempt").unwrap_err();
        assert!(err.to_string().starts_with("parse attempt: "));
    }
}
