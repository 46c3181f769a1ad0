//! Typed success/error value with a composable chain of transformations.

use super::error::{CoreError, ErrorCode, TaskError};

/// Either a value or an `{error_code, error_message}` pair, never both.
///
/// Outcomes are immutable: every combinator consumes `self` and returns a new
/// outcome. `Outcome<()>` covers operations without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Outcome<T> {
    inner: Result<T, TaskError>,
}

impl<T> Outcome<T> {
    /// Successful outcome holding `value`.
    pub const fn success(value: T) -> Self {
        Self { inner: Ok(value) }
    }

    /// Failed outcome. An empty `message` becomes the canonical text of `code`.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            inner: Err(TaskError::new(code, message)),
        }
    }

    /// Failed outcome from an existing task error.
    pub const fn from_error(err: TaskError) -> Self {
        Self { inner: Err(err) }
    }

    /// `true` when a value is present.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.inner.is_ok()
    }

    /// `true` when an error is present.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.inner.is_err()
    }

    /// Borrow the value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValueOfFailedOutcome`] on an error outcome.
    pub fn value(&self) -> Result<&T, CoreError> {
        self.inner
            .as_ref()
            .map_err(|err| CoreError::ValueOfFailedOutcome {
                code: err.code(),
                message: err.message().to_owned(),
            })
    }

    /// Take the value out.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValueOfFailedOutcome`] on an error outcome.
    pub fn into_value(self) -> Result<T, CoreError> {
        self.inner.map_err(|err| CoreError::ValueOfFailedOutcome {
            code: err.code(),
            message: err.message().to_owned(),
        })
    }

    /// `Success` for a value, the stored code otherwise.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        self.inner.as_ref().map_or_else(TaskError::code, |_| ErrorCode::Success)
    }

    /// Empty for a value, the stored message otherwise.
    #[must_use]
    pub fn error_message(&self) -> &str {
        match &self.inner {
            Ok(_) => "",
            Err(err) => err.message(),
        }
    }

    /// Chain a fallible step. Errors short-circuit and are re-typed.
    pub fn and_then<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> Outcome<U>,
    {
        match self.inner {
            Ok(value) => f(value),
            Err(err) => Outcome::from_error(err),
        }
    }

    /// Recover from an error. A success passes through unchanged.
    pub fn or_else<F>(self, f: F) -> Self
    where
        F: FnOnce(ErrorCode, &str) -> Self,
    {
        match self.inner {
            Ok(value) => Self::success(value),
            Err(err) => f(err.code(), err.message()),
        }
    }

    /// Transform the value; an error is carried over untouched.
    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        Outcome {
            inner: self.inner.map(f),
        }
    }

    /// The value, or `default` on error.
    pub fn value_or(self, default: T) -> T {
        self.inner.unwrap_or(default)
    }

    /// Convert into a plain `Result`.
    ///
    /// # Errors
    ///
    /// Returns the stored [`TaskError`] on an error outcome.
    pub fn into_result(self) -> Result<T, TaskError> {
        self.inner
    }
}

impl<T> From<Result<T, TaskError>> for Outcome<T> {
    fn from(inner: Result<T, TaskError>) -> Self {
        Self { inner }
    }
}

impl<T> From<Outcome<T>> for Result<T, TaskError> {
    fn from(outcome: Outcome<T>) -> Self {
        outcome.inner
    }
}

impl<T> From<TaskError> for Outcome<T> {
    fn from(err: TaskError) -> Self {
        Self::from_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_error_accessors() {
        let ok = Outcome::success(5);
        assert!(ok.is_success());
        assert_eq!(ok.error_code(), ErrorCode::Success);
        assert_eq!(ok.error_message(), "");
        assert_eq!(*ok.value().unwrap(), 5);

        let err: Outcome<i32> = Outcome::error(ErrorCode::InvalidArgument, "");
        assert!(err.is_error());
        assert_eq!(err.error_code(), ErrorCode::InvalidArgument);
        assert_eq!(err.error_message(), "Invalid argument");
        assert!(matches!(
            err.value(),
            Err(CoreError::ValueOfFailedOutcome { code: ErrorCode::InvalidArgument, .. })
        ));
    }

    #[test]
    fn test_map_composition() {
        let f = |x: i32| x + 1;
        let g = |x: i32| x * 3;
        let lhs = Outcome::success(7).map(f).map(g);
        let rhs = Outcome::success(7).map(|x| g(f(x)));
        assert_eq!(lhs, rhs);
        assert_eq!(lhs.value_or(0), 24);
    }

    #[test]
    fn test_error_passes_through_map_and_then() {
        let err: Outcome<i32> = Outcome::error(ErrorCode::GpuError, "device lost");
        let mapped = err.clone().map(|x| x.to_string());
        assert_eq!(mapped.error_code(), ErrorCode::GpuError);
        assert_eq!(mapped.error_message(), "device lost");

        let chained = err.and_then(|x| Outcome::success(x * 2));
        assert_eq!(chained.error_message(), "device lost");
    }

    #[test]
    fn test_or_else_recovers_only_errors() {
        let recovered: Outcome<i32> = Outcome::error(ErrorCode::TimeoutError, "slow")
            .or_else(|code, msg| {
                assert_eq!(code, ErrorCode::TimeoutError);
                assert_eq!(msg, "slow");
                Outcome::success(-1)
            });
        assert_eq!(recovered.value_or(0), -1);

        let untouched = Outcome::success(3).or_else(|_, _| Outcome::success(99));
        assert_eq!(untouched.value_or(0), 3);
    }

    #[test]
    fn test_unit_outcome_and_result_conversion() {
        let done: Outcome<()> = Outcome::success(());
        assert!(done.into_result().is_ok());

        let res: Result<u8, TaskError> = Outcome::error(ErrorCode::MemoryError, "oom").into();
        assert_eq!(res.unwrap_err().code(), ErrorCode::MemoryError);
    }
}
