//! Asking the user for file access.
//!
//! A request resolves to granted, denied, or "explain first". The last one
//! carries a [`Rationale`] that performs the follow-up request once the
//! explanation was shown.

use std::{fmt::Debug, path::PathBuf, sync::Arc};

use rootcause::Report;
use tracing::info;

use crate::tasks::TaskScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    AfterRationale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Granted,
    Denied,
    NeedsRationale,
}

/// The system's permission dialog. Blocks until the user answered.
pub trait PermissionPrompt: Send + Sync + 'static {
    fn request(&self, attempt: Attempt) -> PromptAnswer;
}

#[derive(Debug)]
pub enum AccessOutcome {
    Granted,
    Denied,
    NeedsRationale(Rationale),
}

impl AccessOutcome {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessOutcome::Granted)
    }
}

/// Continuation of a request that needs an explanation first.
pub struct Rationale {
    prompt: Arc<dyn PermissionPrompt>,
    scope: TaskScope,
}

impl Debug for Rationale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rationale").finish_non_exhaustive()
    }
}

impl Rationale {
    /// Asks again. Another request for a rationale counts as a denial.
    ///
    /// # Errors
    ///
    /// Fails if the prompt panicked.
    pub async fn retry(self) -> Result<bool, Report> {
        let prompt = self.prompt;
        let answer = self
            .scope
            .blocking(move || prompt.request(Attempt::AfterRationale))
            .await?;
        info!("file access after rationale: {answer:?}");

        Ok(answer == PromptAnswer::Granted)
    }
}

/// Asks `prompt` for file access.
///
/// # Errors
///
/// Fails if the prompt panicked.
pub async fn request_permission(
    prompt: Arc<dyn PermissionPrompt>,
    scope: &TaskScope,
) -> Result<AccessOutcome, Report> {
    let answer = {
        let prompt = prompt.clone();
        scope.blocking(move || prompt.request(Attempt::First)).await?
    };
    info!("file access: {answer:?}");

    Ok(match answer {
        PromptAnswer::Granted => AccessOutcome::Granted,
        PromptAnswer::Denied => AccessOutcome::Denied,
        PromptAnswer::NeedsRationale => AccessOutcome::NeedsRationale(Rationale {
            prompt,
            scope: scope.clone(),
        }),
    })
}

/// Grants access when the scan root can be listed. There is no dialog on
/// desktops, the OS answers through the file system.
#[derive(Debug, Clone)]
pub struct ReadableRoot(pub PathBuf);

impl PermissionPrompt for ReadableRoot {
    fn request(&self, _attempt: Attempt) -> PromptAnswer {
        if std::fs::read_dir(&self.0).is_ok() {
            PromptAnswer::Granted
        } else {
            PromptAnswer::Denied
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::ScriptedPrompt, *};

    #[tokio::test]
    async fn rationale_then_grant() {
        let (scope, _fatal) = TaskScope::new();
        let prompt = ScriptedPrompt::new(&[PromptAnswer::NeedsRationale, PromptAnswer::Granted]);

        let AccessOutcome::NeedsRationale(rationale) =
            request_permission(prompt.clone(), &scope).await.unwrap()
        else {
            panic!("expected a rationale");
        };
        assert!(rationale.retry().await.unwrap());
        assert_eq!(
            *prompt.attempts.lock().unwrap(),
            [Attempt::First, Attempt::AfterRationale]
        );
    }

    #[tokio::test]
    async fn second_rationale_counts_as_denied() {
        let (scope, _fatal) = TaskScope::new();
        let prompt =
            ScriptedPrompt::new(&[PromptAnswer::NeedsRationale, PromptAnswer::NeedsRationale]);

        let AccessOutcome::NeedsRationale(rationale) =
            request_permission(prompt, &scope).await.unwrap()
        else {
            panic!("expected a rationale");
        };
        assert!(!rationale.retry().await.unwrap());
    }

    #[test]
    fn readable_root_checks_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            ReadableRoot(dir.path().to_path_buf()).request(Attempt::First),
            PromptAnswer::Granted
        );
        assert_eq!(
            ReadableRoot(dir.path().join("missing")).request(Attempt::First),
            PromptAnswer::Denied
        );
    }
}
