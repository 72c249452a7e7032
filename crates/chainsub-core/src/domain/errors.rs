use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainErrorCategory {
    Success,
    ConfigError,
    PreconditionError,
    EstimationError,
    SubmissionError,
    IoSystemError,
    InternalError,
}

impl ChainErrorCategory {
    pub const fn exit_status(self) -> ExitStatusClass {
        match self {
            Self::Success => ExitStatusClass {
                exit_code: 0,
                rust_category: "Success",
                status_class: "SUCCESS",
            },
            Self::ConfigError => ExitStatusClass {
                exit_code: 2,
                rust_category: "ConfigError",
                status_class: "CONFIG_FATAL",
            },
            Self::PreconditionError => ExitStatusClass {
                exit_code: 3,
                rust_category: "PreconditionError",
                status_class: "PRECONDITION_FATAL",
            },
            Self::EstimationError => ExitStatusClass {
                exit_code: 4,
                rust_category: "EstimationError",
                status_class: "ESTIMATE_FATAL",
            },
            Self::SubmissionError => ExitStatusClass {
                exit_code: 5,
                rust_category: "SubmissionError",
                status_class: "SUBMIT_FATAL",
            },
            Self::IoSystemError => ExitStatusClass {
                exit_code: 6,
                rust_category: "IoSystemError",
                status_class: "IO_FATAL",
            },
            Self::InternalError => ExitStatusClass {
                exit_code: 7,
                rust_category: "InternalError",
                status_class: "SYS_FATAL",
            },
        }
    }

    pub const fn exit_code(self) -> i32 {
        self.exit_status().exit_code
    }

    pub const fn rust_category(self) -> &'static str {
        self.exit_status().rust_category
    }

    pub const fn status_class(self) -> &'static str {
        self.exit_status().status_class
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatusClass {
    pub exit_code: i32,
    pub rust_category: &'static str,
    pub status_class: &'static str,
}

/// Failure surfaced by any stage of a chain invocation.
///
/// `code` is a stable dotted identifier (`PRE.BASIS_2D`, `SUBMIT.EXEC`, ...)
/// that scripts can grep for; `message` carries the human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainError {
    category: ChainErrorCategory,
    code: &'static str,
    message: String,
}

impl ChainError {
    pub fn new(category: ChainErrorCategory, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }

    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ChainErrorCategory::ConfigError, code, message)
    }

    pub fn precondition(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ChainErrorCategory::PreconditionError, code, message)
    }

    pub fn estimation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ChainErrorCategory::EstimationError, code, message)
    }

    pub fn submission(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ChainErrorCategory::SubmissionError, code, message)
    }

    pub fn io_system(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ChainErrorCategory::IoSystemError, code, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ChainErrorCategory::InternalError, code, message)
    }

    pub const fn category(&self) -> ChainErrorCategory {
        self.category
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.code, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.rust_category(),
            self.code,
            self.message
        )
    }
}

impl Error for ChainError {}

#[cfg(test)]
mod tests {
    use super::{ChainError, ChainErrorCategory};

    #[test]
    fn exit_mapping_is_stable() {
        let cases = [
            (ChainErrorCategory::Success, 0, "Success", "SUCCESS"),
            (ChainErrorCategory::ConfigError, 2, "ConfigError", "CONFIG_FATAL"),
            (
                ChainErrorCategory::PreconditionError,
                3,
                "PreconditionError",
                "PRECONDITION_FATAL",
            ),
            (
                ChainErrorCategory::EstimationError,
                4,
                "EstimationError",
                "ESTIMATE_FATAL",
            ),
            (
                ChainErrorCategory::SubmissionError,
                5,
                "SubmissionError",
                "SUBMIT_FATAL",
            ),
            (ChainErrorCategory::IoSystemError, 6, "IoSystemError", "IO_FATAL"),
            (ChainErrorCategory::InternalError, 7, "InternalError", "SYS_FATAL"),
        ];

        for (category, exit_code, rust_category, status_class) in cases {
            let status = category.exit_status();
            assert_eq!(status.exit_code, exit_code);
            assert_eq!(status.rust_category, rust_category);
            assert_eq!(status.status_class, status_class);
        }
    }

    #[test]
    fn fatal_error_renders_diagnostic_lines() {
        let error = ChainError::precondition(
            "PRE.PES_MISSING",
            "potential artifact 'grids/pes.out' is missing",
        );

        assert_eq!(error.exit_code(), 3);
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [PRE.PES_MISSING] potential artifact 'grids/pes.out' is missing"
        );
        assert_eq!(
            error.fatal_exit_line().as_deref(),
            Some("FATAL EXIT CODE: 3")
        );
        assert_eq!(
            error.to_string(),
            "PreconditionError [PRE.PES_MISSING] potential artifact 'grids/pes.out' is missing"
        );
    }
}
