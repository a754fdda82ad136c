use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const CONTROLLER_PROFILE_SCHEMA_VERSION: u32 = 1;
pub const CONTROLLER_PROFILE_FILE_NAME: &str = "controller-profiles.json";

fn controller_profile_schema_version() -> u32 {
    CONTROLLER_PROFILE_SCHEMA_VERSION
}

fn default_throttle_ms() -> u64 {
    1_500
}

/// Automation hints for one controller's removal form: candidate selectors
/// for each field, submit controls, and a CAPTCHA descriptor when the form is
/// known to challenge automation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerProfile {
    pub controller_id: String,
    #[serde(default)]
    pub domains: Vec<String>,
    /// Known submission form URLs, most specific first.
    #[serde(default)]
    pub candidate_urls: Vec<String>,
    #[serde(default)]
    pub name_selectors: Vec<String>,
    #[serde(default)]
    pub email_selectors: Vec<String>,
    #[serde(default)]
    pub phone_selectors: Vec<String>,
    #[serde(default)]
    pub message_selectors: Vec<String>,
    #[serde(default)]
    pub submit_selectors: Vec<String>,
    #[serde(default)]
    pub captcha: Option<String>,
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl ControllerProfile {
    /// Adapter-default profile: broad selector candidates that match most
    /// contact/removal forms.
    pub fn defaults_for(controller_id: &str) -> Self {
        Self {
            controller_id: controller_id.trim().to_string(),
            domains: Vec::new(),
            candidate_urls: Vec::new(),
            name_selectors: vec![
                "input[name=name]".to_string(),
                "input[name=full_name]".to_string(),
                "#name".to_string(),
            ],
            email_selectors: vec![
                "input[name=email]".to_string(),
                "input[type=email]".to_string(),
                "#email".to_string(),
            ],
            phone_selectors: vec![
                "input[name=phone]".to_string(),
                "input[type=tel]".to_string(),
            ],
            message_selectors: vec![
                "textarea[name=message]".to_string(),
                "textarea[name=description]".to_string(),
                "#message".to_string(),
            ],
            submit_selectors: vec![
                "button[type=submit]".to_string(),
                "input[type=submit]".to_string(),
            ],
            captcha: None,
            throttle_ms: default_throttle_ms(),
        }
    }
}

/// On-disk profile set shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerProfileFile {
    #[serde(default = "controller_profile_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub profiles: Vec<ControllerProfile>,
}

impl Default for ControllerProfileFile {
    fn default() -> Self {
        Self {
            schema_version: CONTROLLER_PROFILE_SCHEMA_VERSION,
            profiles: Vec::new(),
        }
    }
}

/// Indexed profile lookup: controller id, then domain match against the job's
/// target URL, then adapter defaults.
#[derive(Debug, Clone, Default)]
pub struct ControllerProfileSet {
    profiles: Vec<ControllerProfile>,
}

impl ControllerProfileSet {
    pub fn from_file(file: ControllerProfileFile) -> Result<Self> {
        if file.schema_version != CONTROLLER_PROFILE_SCHEMA_VERSION {
            bail!(
                "unsupported controller profile schema_version {} (expected {})",
                file.schema_version,
                CONTROLLER_PROFILE_SCHEMA_VERSION
            );
        }
        for profile in &file.profiles {
            if profile.controller_id.trim().is_empty() {
                bail!("controller profile has empty controller_id");
            }
        }
        Ok(Self {
            profiles: file.profiles,
        })
    }

    pub fn lookup(&self, controller_id: &str, target_url: &str) -> ControllerProfile {
        let controller_id = controller_id.trim();
        if let Some(profile) = self
            .profiles
            .iter()
            .find(|profile| profile.controller_id == controller_id)
        {
            return profile.clone();
        }
        let normalized_url = target_url.trim().to_ascii_lowercase();
        if let Some(profile) = self.profiles.iter().find(|profile| {
            profile
                .domains
                .iter()
                .any(|domain| normalized_url.contains(domain.trim().to_ascii_lowercase().as_str()))
        }) {
            return profile.clone();
        }
        ControllerProfile::defaults_for(controller_id)
    }
}

/// Compiled-in profiles for the first-party adapters.
pub fn builtin_controller_profiles() -> ControllerProfileSet {
    let justdial = ControllerProfile {
        controller_id: "justdial".to_string(),
        domains: vec!["justdial.com".to_string()],
        candidate_urls: vec!["https://www.justdial.com/contactus".to_string()],
        message_selectors: vec![
            "textarea[name=feedback]".to_string(),
            "textarea[name=message]".to_string(),
        ],
        ..ControllerProfile::defaults_for("justdial")
    };
    let sulekha = ControllerProfile {
        controller_id: "sulekha".to_string(),
        domains: vec!["sulekha.com".to_string()],
        candidate_urls: vec!["https://www.sulekha.com/report-abuse".to_string()],
        ..ControllerProfile::defaults_for("sulekha")
    };
    ControllerProfileSet {
        profiles: vec![justdial, sulekha],
    }
}

/// Loads profiles, falling back to the compiled-in set when the file does not
/// exist.
pub fn load_controller_profiles(path: &Path) -> Result<ControllerProfileSet> {
    if !path.exists() {
        return Ok(builtin_controller_profiles());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read controller profiles {}", path.display()))?;
    let file = serde_json::from_str::<ControllerProfileFile>(&raw)
        .with_context(|| format!("failed to parse controller profiles {}", path.display()))?;
    ControllerProfileSet::from_file(file)
        .with_context(|| format!("invalid controller profiles {}", path.display()))
}
