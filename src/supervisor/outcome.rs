use serde::Serialize;

use super::SupervisorError;

/// Final classification of a supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Success { outputs: usize },
    NoOutputProduced,
    NonZeroExit { code: i32 },
}

impl ProcessOutcome {
    /// Classify an exit code together with the number of outputs found.
    ///
    /// A non-zero exit wins over anything the tool managed to write.
    pub fn classify(exit_code: i32, outputs: usize) -> Self {
        if exit_code != 0 {
            ProcessOutcome::NonZeroExit { code: exit_code }
        } else if outputs == 0 {
            ProcessOutcome::NoOutputProduced
        } else {
            ProcessOutcome::Success { outputs }
        }
    }

    /// Turn a failed outcome into the error reported for `tool`.
    pub fn into_result(self, tool: &str) -> Result<usize, SupervisorError> {
        match self {
            ProcessOutcome::Success { outputs } => Ok(outputs),
            ProcessOutcome::NoOutputProduced => Err(SupervisorError::NoOutput {
                tool: tool.to_string(),
            }),
            ProcessOutcome::NonZeroExit { code } => Err(SupervisorError::NonZeroExit {
                tool: tool.to_string(),
                code,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_with_outputs_succeeds() {
        let outcome = ProcessOutcome::classify(0, 2);
        assert_eq!(outcome, ProcessOutcome::Success { outputs: 2 });
        assert_eq!(outcome.into_result("psort.py").expect("ok"), 2);
    }

    #[test]
    fn zero_exit_without_outputs_is_fatal() {
        let outcome = ProcessOutcome::classify(0, 0);
        assert_eq!(outcome, ProcessOutcome::NoOutputProduced);
        let err = outcome.into_result("image_export.py").unwrap_err();
        assert!(matches!(err, SupervisorError::NoOutput { .. }));
        assert!(err.to_string().contains("image_export.py"));
    }

    #[test]
    fn non_zero_exit_is_fatal_even_with_outputs() {
        let outcome = ProcessOutcome::classify(3, 5);
        assert_eq!(outcome, ProcessOutcome::NonZeroExit { code: 3 });
        match outcome.into_result("log2timeline.py") {
            Err(SupervisorError::NonZeroExit { code, .. }) => assert_eq!(code, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
