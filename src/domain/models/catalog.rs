//! Phase catalog: the single lookup table for warmup phase definitions.
//!
//! Content assignment, dependency checks and script sequencing all read from
//! here instead of switching on phase names.

use serde::{Deserialize, Serialize};

use super::phase::WarmupPhaseKind;

/// Marker returned for phases the catalog does not know.
pub const UNKNOWN_PHASE_MARKER: &str = "Unknown warmup phase";

/// Kind of content a phase consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Image,
    Text,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "image" => Some(Self::Image),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Categories are in preference order; the provider tries each in turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRequirement {
    pub categories: Vec<String>,
    pub required: bool,
}

impl ContentRequirement {
    pub fn required(categories: &[&str]) -> Self {
        Self { categories: categories.iter().map(ToString::to_string).collect(), required: true }
    }

    pub fn optional(categories: &[&str]) -> Self {
        Self { categories: categories.iter().map(ToString::to_string).collect(), required: false }
    }
}

/// Account-level mutation applied when a phase completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostExecutionAction {
    /// Copy `new_username` from the automation response onto the account
    UpdateUsername,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Device-side API helper (gallery push, clipboard, cleanup)
    Api,
    /// Lua automation script
    Lua,
}

/// One step of a device automation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub kind: CommandKind,
    pub script: String,
    pub description: String,
}

impl DeviceCommand {
    pub fn lua(script: impl Into<String>, description: impl Into<String>) -> Self {
        Self { kind: CommandKind::Lua, script: script.into(), description: description.into() }
    }

    pub fn api(script: impl Into<String>, description: impl Into<String>) -> Self {
        Self { kind: CommandKind::Api, script: script.into(), description: description.into() }
    }
}

/// Switch the device to the account's container.
pub fn container_switch_sequence(container_number: i64) -> Vec<DeviceCommand> {
    vec![
        DeviceCommand::lua("open_settings.lua", "Open container settings"),
        DeviceCommand::lua("scroll_to_top_container.lua", "Scroll to top of container list"),
        DeviceCommand::lua(
            format!("select_container_{container_number}.lua"),
            format!("Select container {container_number}"),
        ),
    ]
}

/// Fixed sequence that sets an account private after warmup completes.
pub fn private_account_sequence(container_number: i64) -> Vec<DeviceCommand> {
    let mut commands = container_switch_sequence(container_number);
    commands.push(DeviceCommand::lua("set_account_private.lua", "Set account to private"));
    commands
}

/// Static definition of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub kind: WarmupPhaseKind,
    pub description: String,
    pub image: Option<ContentRequirement>,
    pub text: Option<ContentRequirement>,
    pub dependencies: Vec<WarmupPhaseKind>,
    pub cooldown_hours: u32,
    pub script: Option<String>,
    pub post_action: Option<PostExecutionAction>,
}

impl PhaseDefinition {
    pub fn new(kind: WarmupPhaseKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            image: None,
            text: None,
            dependencies: Vec::new(),
            cooldown_hours: 0,
            script: None,
            post_action: None,
        }
    }

    pub fn with_image(mut self, requirement: ContentRequirement) -> Self {
        self.image = Some(requirement);
        self
    }

    pub fn with_text(mut self, requirement: ContentRequirement) -> Self {
        self.text = Some(requirement);
        self
    }

    pub fn depends_on(mut self, phase: WarmupPhaseKind) -> Self {
        if !self.dependencies.contains(&phase) {
            self.dependencies.push(phase);
        }
        self
    }

    pub fn with_cooldown_hours(mut self, hours: u32) -> Self {
        self.cooldown_hours = hours;
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_post_action(mut self, action: PostExecutionAction) -> Self {
        self.post_action = Some(action);
        self
    }

    pub fn requires_content(&self) -> bool {
        self.image.is_some() || self.text.is_some()
    }

    pub fn requirement(&self, kind: ContentKind) -> Option<&ContentRequirement> {
        match kind {
            ContentKind::Image => self.image.as_ref(),
            ContentKind::Text => self.text.as_ref(),
        }
    }
}

/// Flat view of a phase definition, returned for known and unknown phases alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRequirements {
    pub phase: String,
    pub description: String,
    pub content_categories: Vec<String>,
    pub content_required: bool,
    pub text_categories: Vec<String>,
    pub text_required: bool,
    pub dependencies: Vec<String>,
    pub cooldown_hours: u32,
    pub script: Option<String>,
    pub post_action: Option<PostExecutionAction>,
    pub error: Option<String>,
}

impl PhaseRequirements {
    fn unknown(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            description: String::new(),
            content_categories: Vec::new(),
            content_required: false,
            text_categories: Vec::new(),
            text_required: false,
            dependencies: Vec::new(),
            cooldown_hours: 0,
            script: None,
            post_action: None,
            error: Some(UNKNOWN_PHASE_MARKER.to_string()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.error.is_some()
    }
}

impl From<&PhaseDefinition> for PhaseRequirements {
    fn from(def: &PhaseDefinition) -> Self {
        Self {
            phase: def.kind.as_str().to_string(),
            description: def.description.clone(),
            content_categories: def.image.as_ref().map(|r| r.categories.clone()).unwrap_or_default(),
            content_required: def.image.as_ref().is_some_and(|r| r.required),
            text_categories: def.text.as_ref().map(|r| r.categories.clone()).unwrap_or_default(),
            text_required: def.text.as_ref().is_some_and(|r| r.required),
            dependencies: def.dependencies.iter().map(|d| d.as_str().to_string()).collect(),
            cooldown_hours: def.cooldown_hours,
            script: def.script.clone(),
            post_action: def.post_action,
            error: None,
        }
    }
}

/// Ordered, immutable set of phase definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCatalog {
    entries: Vec<PhaseDefinition>,
}

impl Default for PhaseCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl PhaseCatalog {
    /// Build a catalog from entries; order of entries is phase order.
    ///
    /// Dependencies on phases missing from the catalog are dropped, and the
    /// first entry (when manual setup) becomes an implicit dependency of all
    /// later entries.
    pub fn from_entries(entries: Vec<PhaseDefinition>) -> Self {
        let kinds: Vec<WarmupPhaseKind> = entries.iter().map(|e| e.kind).collect();
        let has_manual_setup = kinds.contains(&WarmupPhaseKind::ManualSetup);

        let entries = entries
            .into_iter()
            .map(|mut entry| {
                entry.dependencies.retain(|d| kinds.contains(d) && *d != entry.kind);
                if has_manual_setup
                    && entry.kind != WarmupPhaseKind::ManualSetup
                    && !entry.dependencies.contains(&WarmupPhaseKind::ManualSetup)
                {
                    entry.dependencies.insert(0, WarmupPhaseKind::ManualSetup);
                }
                entry
            })
            .collect();

        Self { entries }
    }

    /// The production warmup sequence.
    pub fn standard() -> Self {
        use WarmupPhaseKind as K;

        let highlight_image = ContentRequirement::required(&["highlight", "any"]);
        let highlight_name = ContentRequirement::required(&["highlight_group_name"]);

        Self::from_entries(vec![
            PhaseDefinition::new(K::ManualSetup, "Manual account setup by an operator"),
            PhaseDefinition::new(K::Bio, "Change bio")
                .with_text(ContentRequirement::required(&["bio"]))
                .with_cooldown_hours(24)
                .with_script("change_bio_to_clipboard.lua"),
            PhaseDefinition::new(K::Gender, "Set gender")
                .with_cooldown_hours(24)
                .with_script("change_gender_to_female.lua"),
            PhaseDefinition::new(K::Name, "Change display name")
                .with_text(ContentRequirement::required(&["name"]))
                .with_cooldown_hours(24)
                .with_script("change_name_to_clipboard.lua"),
            PhaseDefinition::new(K::Username, "Change username")
                .with_text(ContentRequirement::required(&["username"]))
                .with_cooldown_hours(24)
                .with_script("change_username_to_clipboard.lua")
                .with_post_action(PostExecutionAction::UpdateUsername),
            PhaseDefinition::new(K::FirstHighlight, "Create first highlight group")
                .with_image(highlight_image.clone())
                .with_text(highlight_name.clone())
                .with_cooldown_hours(24)
                .with_script("upload_first_highlight_group_with_clipboard_name_newest_media_no_caption.lua"),
            PhaseDefinition::new(K::NewHighlight, "Add a new highlight group")
                .with_image(highlight_image)
                .with_text(highlight_name)
                .depends_on(K::FirstHighlight)
                .with_cooldown_hours(24)
                .with_script("upload_new_highlightgroup_clipboard_name_newest_media_no_caption.lua"),
            PhaseDefinition::new(K::PostCaption, "Upload post with caption")
                .with_image(ContentRequirement::required(&["post", "any"]))
                .with_text(ContentRequirement::required(&["post", "any"]))
                .with_cooldown_hours(24)
                .with_script("upload_post_newest_media_clipboard_caption.lua"),
            PhaseDefinition::new(K::PostNoCaption, "Upload post without caption")
                .with_image(ContentRequirement::required(&["post", "any"]))
                .with_cooldown_hours(24)
                .with_script("upload_post_newest_media_no_caption.lua"),
            PhaseDefinition::new(K::StoryCaption, "Upload story with caption")
                .with_image(ContentRequirement::required(&["story", "any"]))
                .with_text(ContentRequirement::required(&["story", "any"]))
                .with_cooldown_hours(24)
                .with_script("upload_story_newest_media_clipboard_caption.lua"),
            PhaseDefinition::new(K::StoryNoCaption, "Upload story without caption")
                .with_image(ContentRequirement::required(&["story", "any"]))
                .with_cooldown_hours(24)
                .with_script("upload_story_newest_media_no_caption.lua"),
        ])
    }

    pub fn phases(&self) -> impl Iterator<Item = WarmupPhaseKind> + '_ {
        self.entries.iter().map(|e| e.kind)
    }

    pub fn entries(&self) -> &[PhaseDefinition] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, kind: WarmupPhaseKind) -> Option<&PhaseDefinition> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    pub fn contains(&self, kind: WarmupPhaseKind) -> bool {
        self.get(kind).is_some()
    }

    /// Zero-based position in the catalog order.
    pub fn position(&self, kind: WarmupPhaseKind) -> Option<usize> {
        self.entries.iter().position(|e| e.kind == kind)
    }

    /// Look up requirements by name; unknown names get the error marker record.
    pub fn get_requirements(&self, phase: &str) -> PhaseRequirements {
        WarmupPhaseKind::from_str(phase)
            .and_then(|kind| self.get(kind))
            .map_or_else(|| PhaseRequirements::unknown(phase), PhaseRequirements::from)
    }

    pub fn dependencies(&self, kind: WarmupPhaseKind) -> &[WarmupPhaseKind] {
        self.get(kind).map(|e| e.dependencies.as_slice()).unwrap_or_default()
    }

    pub fn previous_phase(&self, kind: WarmupPhaseKind) -> Option<WarmupPhaseKind> {
        let pos = self.position(kind)?;
        pos.checked_sub(1).map(|p| self.entries[p].kind)
    }

    pub fn next_phase(&self, kind: WarmupPhaseKind) -> Option<WarmupPhaseKind> {
        let pos = self.position(kind)?;
        self.entries.get(pos + 1).map(|e| e.kind)
    }

    pub fn dependents_of(&self, kind: WarmupPhaseKind) -> Vec<WarmupPhaseKind> {
        self.entries.iter().filter(|e| e.dependencies.contains(&kind)).map(|e| e.kind).collect()
    }

    /// Phases a bot must complete for warmup to be done.
    pub fn bot_phases(&self) -> impl Iterator<Item = WarmupPhaseKind> + '_ {
        self.phases().filter(|k| *k != WarmupPhaseKind::ManualSetup)
    }

    /// Offsets from initialization at which each phase first becomes eligible.
    ///
    /// Each phase waits for the cumulative cooldowns of every phase up to and
    /// including itself.
    pub fn initial_offsets_hours(&self) -> Vec<(WarmupPhaseKind, i64)> {
        let mut total: i64 = 0;
        self.entries
            .iter()
            .map(|e| {
                total += i64::from(e.cooldown_hours);
                (e.kind, total)
            })
            .collect()
    }

    /// Device commands that perform a phase on the given container.
    ///
    /// `first_automation` adds the onboarding skip before the phase script.
    pub fn script_sequence(
        &self,
        kind: WarmupPhaseKind,
        container_number: i64,
        first_automation: bool,
    ) -> Vec<DeviceCommand> {
        let Some(def) = self.get(kind) else {
            return Vec::new();
        };
        let Some(script) = def.script.as_ref() else {
            return Vec::new();
        };

        let mut commands = container_switch_sequence(container_number);
        if first_automation {
            commands.push(DeviceCommand::lua("skip_onboarding.lua", "Dismiss onboarding screens"));
        }
        if def.image.is_some() {
            commands.push(DeviceCommand::api("ios16_photo_cleaner", "Clear device gallery"));
            commands.push(DeviceCommand::api("gallery", "Push assigned image to gallery"));
        }
        if def.text.is_some() {
            commands.push(DeviceCommand::api("clipboard", "Copy assigned text to clipboard"));
        }
        commands.push(DeviceCommand::lua(script.clone(), def.description.clone()));
        commands
    }
}
