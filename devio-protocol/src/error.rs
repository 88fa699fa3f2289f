/// A rejected stream spec, carrying every problem found in one pass.
///
/// Parsing never short-circuits: a spec with a bad baudrate *and* an
/// unsupported option reports both.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bad stream spec ({})", .errors.join(", "))]
pub struct SpecError {
    /// The collected problems, in the order they were found. Never empty.
    pub errors: Vec<String>,
}

impl SpecError {
    pub fn new(errors: Vec<String>) -> Self {
        debug_assert!(!errors.is_empty());
        Self { errors }
    }

    pub fn one(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
        }
    }
}
