use thiserror::Error;

/// Every failure an operation can report back to the caller.
///
/// The set is closed: each variant maps to exactly one wire-level error kind
/// through [`JudgeError::kind`], and the display text is what ends up in the
/// `data` field of the response envelope.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("{0}")]
    TokenVerificationFailed(String),
    /// Contestant source failed to compile; carries the compiler diagnostic.
    #[error("{0}")]
    Compile(String),
    /// Checker source failed to compile.
    #[error("{0}")]
    SpjCompile(String),
    /// Operational fault in the judge itself (workspace, engine, files).
    #[error("{0}")]
    JudgeClient(String),
    #[error("{0}")]
    InvalidRequest(String),
    /// The payload could not be bound to the operation's parameters.
    #[error("InvalidArguments :{0}")]
    InvalidArguments(#[from] serde_json::Error),
    #[error("{} :{}", io_kind_name(.source), .source)]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl JudgeError {
    /// The error kind reported in the `err` field of the envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenVerificationFailed(_) => "TokenVerificationFailed",
            Self::Compile(_) => "CompileError",
            Self::SpjCompile(_) => "SPJCompileError",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::JudgeClient(_) | Self::InvalidArguments(_) | Self::Io { .. } => {
                "JudgeClientError"
            }
        }
    }

    /// Re-tags an ordinary compile failure as a checker compile failure.
    pub fn into_spj(self) -> Self {
        match self {
            Self::Compile(message) => Self::SpjCompile(message),
            other => other,
        }
    }
}

fn io_kind_name(err: &std::io::Error) -> String {
    format!("{:?}", err.kind())
}

pub type Result<T> = std::result::Result<T, JudgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(
            JudgeError::TokenVerificationFailed("invalid token".into()).kind(),
            "TokenVerificationFailed"
        );
        assert_eq!(JudgeError::Compile("x".into()).kind(), "CompileError");
        assert_eq!(JudgeError::SpjCompile("x".into()).kind(), "SPJCompileError");
        assert_eq!(JudgeError::InvalidRequest("404".into()).kind(), "InvalidRequest");
        assert_eq!(JudgeError::JudgeClient("x".into()).kind(), "JudgeClientError");
    }

    #[test]
    fn test_only_compile_errors_are_retagged() {
        let retagged = JudgeError::Compile("main.c:1: error".into()).into_spj();
        assert_eq!(retagged.kind(), "SPJCompileError");
        assert_eq!(retagged.to_string(), "main.c:1: error");

        let untouched = JudgeError::JudgeClient("failed to create runtime dir".into()).into_spj();
        assert_eq!(untouched.kind(), "JudgeClientError");
    }

    #[test]
    fn test_unclassified_errors_name_their_cause() {
        let missing = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = JudgeError::from(missing);
        assert_eq!(err.kind(), "JudgeClientError");
        assert!(err.to_string().starts_with("InvalidArguments :"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = JudgeError::from(io);
        assert_eq!(err.kind(), "JudgeClientError");
        assert_eq!(err.to_string(), "NotFound :gone");
    }
}
