//! Crate-wide error type.

/// The overarching error type which contains all possible errors as variants.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A kernel primitive (`WaitForDebugEvent`, `ReadProcessMemory`, ...) failed.
    #[error("kernel call {call} failed: {source}")]
    System {
        /// Name of the kernel primitive that failed, for diagnostics.
        call: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// A precondition violated by the caller, e.g. an invalid memory address
    /// or a breakpoint-kind collision.
    #[error("{0}")]
    Domain(String),
    /// An invariant of the debugger's own state was breached.
    ///
    /// Constructing this variant in a release build always means a bug; in
    /// debug builds callers are expected to have already hit a
    /// `debug_assert!` before reaching here.
    #[error("internal invariant violated: {0}")]
    Logic(String),
    /// Any other error occurred.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn system(call: &'static str, source: std::io::Error) -> Self {
        Self::System { call, source }
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    pub(crate) fn logic(message: impl Into<String>) -> Self {
        let message = message.into();
        debug_assert!(false, "{message}");
        Self::Logic(message)
    }
}

/// A `Result` defaulting to this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
