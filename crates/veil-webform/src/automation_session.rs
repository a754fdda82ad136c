use std::collections::BTreeSet;

use async_trait::async_trait;

pub const AUTOMATION_ERROR_NAVIGATION_FAILED: &str = "automation_navigation_failed";
pub const AUTOMATION_ERROR_TIMEOUT: &str = "automation_timeout";
pub const AUTOMATION_ERROR_MISSING_FIELD: &str = "automation_missing_field";
pub const AUTOMATION_ERROR_MISSING_SUBMIT_CONTROL: &str = "automation_missing_submit_control";
pub const AUTOMATION_ERROR_CAPTCHA_CHALLENGE: &str = "automation_captcha_challenge";
pub const AUTOMATION_ERROR_BACKEND_UNAVAILABLE: &str = "automation_backend_unavailable";

/// One failed automation step, with a stable code the worker's retry logic
/// keys off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationStepError {
    pub code: String,
    pub detail: String,
    pub retryable: bool,
}

impl AutomationStepError {
    pub fn retryable(code: &str, detail: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            detail: detail.into(),
            retryable: true,
        }
    }

    pub fn permanent(code: &str, detail: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            detail: detail.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for AutomationStepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "code={} retryable={} detail={}",
            self.code, self.retryable, self.detail
        )
    }
}

impl std::error::Error for AutomationStepError {}

pub type StepResult<T> = Result<T, AutomationStepError>;

/// Minimal surface the handlers drive. Live implementations wrap a browser
/// engine and bound every step with their own navigation/idle timeouts; the
/// scripted implementation below replays fixtures for tests and dry runs.
#[async_trait]
pub trait AutomationSession: Send {
    async fn navigate(&mut self, url: &str) -> StepResult<()>;
    async fn page_content(&mut self) -> StepResult<String>;
    async fn screenshot_png(&mut self) -> StepResult<Vec<u8>>;
    /// Fills the first matching selector candidate, returning the selector
    /// that matched.
    async fn fill_first(&mut self, selectors: &[String], value: &str) -> StepResult<String>;
    /// Clicks the first matching selector candidate, returning the selector
    /// that matched.
    async fn click_first(&mut self, selectors: &[String]) -> StepResult<String>;
}

/// Produces one session per job run; sessions are never shared across jobs.
#[async_trait]
pub trait AutomationSessionFactory: Send + Sync {
    async fn create_session(&self) -> anyhow::Result<Box<dyn AutomationSession>>;
}

/// Scripted session: resolves selectors against a fixed set and records every
/// interaction. Failure injection mirrors the live engine's failure codes so
/// worker retry behavior is exercised without a browser.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAutomationSession {
    pub known_selectors: BTreeSet<String>,
    pub page_html: String,
    pub fail_navigate_with: Option<AutomationStepError>,
    pub navigated: Vec<String>,
    pub filled: Vec<(String, String)>,
    pub clicked: Vec<String>,
}

impl ScriptedAutomationSession {
    pub fn with_selectors<const N: usize>(selectors: [&str; N], page_html: &str) -> Self {
        Self {
            known_selectors: selectors.iter().map(|s| s.to_string()).collect(),
            page_html: page_html.to_string(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl AutomationSession for ScriptedAutomationSession {
    async fn navigate(&mut self, url: &str) -> StepResult<()> {
        if let Some(error) = self.fail_navigate_with.clone() {
            return Err(error);
        }
        self.navigated.push(url.to_string());
        Ok(())
    }

    async fn page_content(&mut self) -> StepResult<String> {
        Ok(self.page_html.clone())
    }

    async fn screenshot_png(&mut self) -> StepResult<Vec<u8>> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn fill_first(&mut self, selectors: &[String], value: &str) -> StepResult<String> {
        let Some(matched) = selectors
            .iter()
            .find(|selector| self.known_selectors.contains(*selector))
        else {
            return Err(AutomationStepError::retryable(
                AUTOMATION_ERROR_MISSING_FIELD,
                format!("no candidate selector matched out of {}", selectors.len()),
            ));
        };
        self.filled.push((matched.clone(), value.to_string()));
        Ok(matched.clone())
    }

    async fn click_first(&mut self, selectors: &[String]) -> StepResult<String> {
        let Some(matched) = selectors
            .iter()
            .find(|selector| self.known_selectors.contains(*selector))
        else {
            return Err(AutomationStepError::retryable(
                AUTOMATION_ERROR_MISSING_SUBMIT_CONTROL,
                format!("no candidate selector matched out of {}", selectors.len()),
            ));
        };
        self.clicked.push(matched.clone());
        Ok(matched.clone())
    }
}

/// Factory handing out clones of one scripted session template.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSessionFactory {
    pub template: ScriptedAutomationSession,
}

impl ScriptedSessionFactory {
    pub fn new(template: ScriptedAutomationSession) -> Self {
        Self { template }
    }
}

#[async_trait]
impl AutomationSessionFactory for ScriptedSessionFactory {
    async fn create_session(&self) -> anyhow::Result<Box<dyn AutomationSession>> {
        Ok(Box::new(self.template.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AutomationSession, ScriptedAutomationSession, AUTOMATION_ERROR_MISSING_FIELD,
        AUTOMATION_ERROR_MISSING_SUBMIT_CONTROL,
    };

    #[tokio::test]
    async fn unit_scripted_session_matches_first_known_selector() {
        let mut session = ScriptedAutomationSession::with_selectors(
            ["#email", "button[type=submit]"],
            "<html>ok</html>",
        );
        let matched = session
            .fill_first(
                &["input[name=email]".to_string(), "#email".to_string()],
                "j***@example.com",
            )
            .await
            .expect("fill");
        assert_eq!(matched, "#email");
        assert_eq!(session.filled.len(), 1);
    }

    #[tokio::test]
    async fn unit_scripted_session_reports_missing_controls() {
        let mut session =
            ScriptedAutomationSession::with_selectors(["#email"], "<html>ok</html>");
        let fill_error = session
            .fill_first(&["#name".to_string()], "J. D.")
            .await
            .expect_err("no match");
        assert_eq!(fill_error.code, AUTOMATION_ERROR_MISSING_FIELD);

        let click_error = session
            .click_first(&["#submit".to_string()])
            .await
            .expect_err("no match");
        assert_eq!(click_error.code, AUTOMATION_ERROR_MISSING_SUBMIT_CONTROL);
        assert!(click_error.retryable);
    }
}
