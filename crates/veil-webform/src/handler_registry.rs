use async_trait::async_trait;

use crate::automation_session::{
    AutomationSession, AutomationStepError, AUTOMATION_ERROR_CAPTCHA_CHALLENGE,
};
use crate::controller_profile::ControllerProfile;
use crate::webform_job::WebformJob;

const CONFIRMATION_EXCERPT_MAX_CHARS: usize = 280;

/// Typed outcome of one handler run. `run` never raises: every failure comes
/// back through here so worker retry logic stays uniform across controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Submitted {
        confirmation_excerpt: String,
    },
    /// Transient failure; the worker reschedules within the attempt budget.
    Retryable {
        code: String,
        detail: String,
    },
    /// The job cannot proceed no matter how often it retries (CAPTCHA wall,
    /// no resolvable form URL).
    Permanent {
        code: String,
        detail: String,
    },
}

impl HandlerOutcome {
    fn from_step_error(error: AutomationStepError) -> Self {
        if error.retryable {
            Self::Retryable {
                code: error.code,
                detail: error.detail,
            }
        } else {
            Self::Permanent {
                code: error.code,
                detail: error.detail,
            }
        }
    }
}

/// Per-controller automation strategy. Selection is exact key first, then
/// domain substring against the job's target URL.
#[async_trait]
pub trait ControllerHandler: Send + Sync {
    fn key(&self) -> &'static str;
    fn domains(&self) -> &'static [&'static str] {
        &[]
    }
    fn default_url(&self) -> Option<&'static str> {
        None
    }

    /// Form URL precedence: explicit job-supplied URL, then the first
    /// profile candidate, then the handler default.
    fn resolve_url(&self, job: &WebformJob, profile: &ControllerProfile) -> Option<String> {
        if let Some(url) = job
            .submission_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            return Some(url.to_string());
        }
        if let Some(url) = profile
            .candidate_urls
            .iter()
            .map(|url| url.trim())
            .find(|url| !url.is_empty())
        {
            return Some(url.to_string());
        }
        self.default_url().map(str::to_string)
    }

    async fn run(
        &self,
        session: &mut dyn AutomationSession,
        job: &WebformJob,
        profile: &ControllerProfile,
        form_url: &str,
    ) -> HandlerOutcome;
}

/// Shared submission flow: navigate, fill the profile's field candidates,
/// press submit, and excerpt the confirmation page. Controller handlers
/// layer their quirks on top of this.
async fn run_form_submission(
    session: &mut dyn AutomationSession,
    job: &WebformJob,
    profile: &ControllerProfile,
    form_url: &str,
    fill_phone: bool,
) -> HandlerOutcome {
    if let Some(captcha) = profile.captcha.as_deref() {
        return HandlerOutcome::Permanent {
            code: AUTOMATION_ERROR_CAPTCHA_CHALLENGE.to_string(),
            detail: format!("form is protected by {captcha}"),
        };
    }

    if let Err(error) = session.navigate(form_url).await {
        return HandlerOutcome::from_step_error(error);
    }

    if !job.payload.name.is_empty() {
        if let Err(error) = session
            .fill_first(&profile.name_selectors, &job.payload.name)
            .await
        {
            return HandlerOutcome::from_step_error(error);
        }
    }
    if !job.payload.email.is_empty() {
        if let Err(error) = session
            .fill_first(&profile.email_selectors, &job.payload.email)
            .await
        {
            return HandlerOutcome::from_step_error(error);
        }
    }
    if fill_phone && !job.payload.phone.is_empty() {
        if let Err(error) = session
            .fill_first(&profile.phone_selectors, &job.payload.phone)
            .await
        {
            return HandlerOutcome::from_step_error(error);
        }
    }
    if let Err(error) = session
        .fill_first(&profile.message_selectors, &job.payload.message)
        .await
    {
        return HandlerOutcome::from_step_error(error);
    }

    if let Err(error) = session.click_first(&profile.submit_selectors).await {
        return HandlerOutcome::from_step_error(error);
    }

    match session.page_content().await {
        Ok(content) => HandlerOutcome::Submitted {
            confirmation_excerpt: excerpt(&content),
        },
        Err(error) => HandlerOutcome::from_step_error(error),
    }
}

fn excerpt(content: &str) -> String {
    let flattened = content.split_whitespace().collect::<Vec<_>>().join(" ");
    flattened
        .chars()
        .take(CONFIRMATION_EXCERPT_MAX_CHARS)
        .collect()
}

/// Justdial listing-removal form.
pub struct JustdialHandler;

#[async_trait]
impl ControllerHandler for JustdialHandler {
    fn key(&self) -> &'static str {
        "justdial"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["justdial.com"]
    }

    fn default_url(&self) -> Option<&'static str> {
        Some("https://www.justdial.com/contactus")
    }

    async fn run(
        &self,
        session: &mut dyn AutomationSession,
        job: &WebformJob,
        profile: &ControllerProfile,
        form_url: &str,
    ) -> HandlerOutcome {
        // Justdial's form rejects submissions without a callback number, so
        // the phone field is filled when the payload carries one.
        run_form_submission(session, job, profile, form_url, true).await
    }
}

/// Sulekha report-abuse form.
pub struct SulekhaHandler;

#[async_trait]
impl ControllerHandler for SulekhaHandler {
    fn key(&self) -> &'static str {
        "sulekha"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["sulekha.com"]
    }

    fn default_url(&self) -> Option<&'static str> {
        Some("https://www.sulekha.com/report-abuse")
    }

    async fn run(
        &self,
        session: &mut dyn AutomationSession,
        job: &WebformJob,
        profile: &ControllerProfile,
        form_url: &str,
    ) -> HandlerOutcome {
        run_form_submission(session, job, profile, form_url, false).await
    }
}

/// Fallback for controllers with a profile but no dedicated adapter.
pub struct GenericFormHandler;

#[async_trait]
impl ControllerHandler for GenericFormHandler {
    fn key(&self) -> &'static str {
        "generic"
    }

    async fn run(
        &self,
        session: &mut dyn AutomationSession,
        job: &WebformJob,
        profile: &ControllerProfile,
        form_url: &str,
    ) -> HandlerOutcome {
        run_form_submission(session, job, profile, form_url, false).await
    }
}

/// Static handler registry; adding a controller means adding one entry here.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn ControllerHandler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Box<dyn ControllerHandler>>) -> Self {
        Self { handlers }
    }

    /// Registry with every first-party adapter.
    pub fn builtin() -> Self {
        Self::new(vec![
            Box::new(JustdialHandler),
            Box::new(SulekhaHandler),
            Box::new(GenericFormHandler),
        ])
    }

    /// Exact key match first, then first domain substring match against the
    /// job's target URL. `None` means the job cannot proceed.
    pub fn select(&self, controller_id: &str, target_url: &str) -> Option<&dyn ControllerHandler> {
        let controller_id = controller_id.trim();
        if let Some(handler) = self
            .handlers
            .iter()
            .find(|handler| handler.key() == controller_id)
        {
            return Some(handler.as_ref());
        }
        let normalized_url = target_url.trim().to_ascii_lowercase();
        self.handlers
            .iter()
            .find(|handler| {
                handler
                    .domains()
                    .iter()
                    .any(|domain| normalized_url.contains(domain))
            })
            .map(|handler| handler.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::{ControllerHandler, HandlerOutcome, HandlerRegistry, JustdialHandler};
    use crate::automation_session::{
        ScriptedAutomationSession, AUTOMATION_ERROR_CAPTCHA_CHALLENGE,
        AUTOMATION_ERROR_MISSING_SUBMIT_CONTROL,
    };
    use crate::controller_profile::{builtin_controller_profiles, ControllerProfile};
    use crate::webform_job::{SubmissionPayload, WebformJob};

    fn sample_job() -> WebformJob {
        WebformJob::new(
            "wfj-1",
            "act-1",
            "subj-1",
            "justdial",
            "https://justdial.com/x",
            SubmissionPayload::sanitized(
                "J. D.",
                "j***@example.com",
                "+15550000",
                "Please remove the listing.",
            ),
            1_000,
        )
    }

    #[test]
    fn unit_registry_selects_exact_key_then_domain() {
        let registry = HandlerRegistry::builtin();
        assert_eq!(
            registry
                .select("justdial", "https://anything.example")
                .expect("exact")
                .key(),
            "justdial"
        );
        assert_eq!(
            registry
                .select("unknown", "https://www.sulekha.com/p/1")
                .expect("domain")
                .key(),
            "sulekha"
        );
        assert!(registry.select("unknown", "https://nowhere.example").is_none());
    }

    #[test]
    fn unit_resolve_url_precedence_is_job_then_profile_then_default() {
        let handler = JustdialHandler;
        let profiles = builtin_controller_profiles();
        let profile = profiles.lookup("justdial", "https://justdial.com/x");
        let mut job = sample_job();

        job.submission_url = Some("https://www.justdial.com/special-form".to_string());
        assert_eq!(
            handler.resolve_url(&job, &profile).as_deref(),
            Some("https://www.justdial.com/special-form")
        );

        job.submission_url = None;
        assert_eq!(
            handler.resolve_url(&job, &profile).as_deref(),
            Some("https://www.justdial.com/contactus")
        );

        let bare_profile = ControllerProfile {
            candidate_urls: Vec::new(),
            ..profile
        };
        assert_eq!(
            handler.resolve_url(&job, &bare_profile).as_deref(),
            Some("https://www.justdial.com/contactus")
        );
    }

    #[tokio::test]
    async fn functional_submission_fills_fields_and_reads_confirmation() {
        let handler = JustdialHandler;
        let profiles = builtin_controller_profiles();
        let profile = profiles.lookup("justdial", "https://justdial.com/x");
        let mut session = ScriptedAutomationSession::with_selectors(
            [
                "input[name=name]",
                "input[name=email]",
                "input[name=phone]",
                "textarea[name=feedback]",
                "button[type=submit]",
            ],
            "<html>Thank you. Ticket Number: JD-4821</html>",
        );
        let job = sample_job();
        let outcome = handler
            .run(&mut session, &job, &profile, "https://www.justdial.com/contactus")
            .await;
        let HandlerOutcome::Submitted {
            confirmation_excerpt,
        } = outcome
        else {
            panic!("expected submitted outcome, got {outcome:?}");
        };
        assert!(confirmation_excerpt.contains("JD-4821"));
        assert_eq!(session.filled.len(), 4);
        assert_eq!(session.clicked, vec!["button[type=submit]".to_string()]);
    }

    #[tokio::test]
    async fn regression_missing_submit_control_is_a_retryable_outcome() {
        let handler = JustdialHandler;
        let profiles = builtin_controller_profiles();
        let profile = profiles.lookup("justdial", "https://justdial.com/x");
        let mut session = ScriptedAutomationSession::with_selectors(
            [
                "input[name=name]",
                "input[name=email]",
                "input[name=phone]",
                "textarea[name=feedback]",
            ],
            "<html></html>",
        );
        let job = sample_job();
        let outcome = handler
            .run(&mut session, &job, &profile, "https://www.justdial.com/contactus")
            .await;
        assert_eq!(
            outcome,
            HandlerOutcome::Retryable {
                code: AUTOMATION_ERROR_MISSING_SUBMIT_CONTROL.to_string(),
                detail: "no candidate selector matched out of 2".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unit_captcha_protected_profile_is_a_permanent_outcome() {
        let handler = JustdialHandler;
        let profiles = builtin_controller_profiles();
        let profile = ControllerProfile {
            captcha: Some("recaptcha-v2".to_string()),
            ..profiles.lookup("justdial", "https://justdial.com/x")
        };
        let mut session = ScriptedAutomationSession::default();
        let job = sample_job();
        let outcome = handler
            .run(&mut session, &job, &profile, "https://www.justdial.com/contactus")
            .await;
        assert!(matches!(
            outcome,
            HandlerOutcome::Permanent { ref code, .. }
                if code == AUTOMATION_ERROR_CAPTCHA_CHALLENGE
        ));
        assert!(session.navigated.is_empty());
    }
}
