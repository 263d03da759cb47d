//! Declarative command catalog.
//!
//! A catalog lists the controllable aspects of one projector family. Each
//! [`CommandEntry`] carries one or more [`ActionKind`]s, and every action
//! carries the codec inputs needed to build its frames. Catalogs are plain
//! data: they are built once, validated once, and never mutated afterwards.

pub mod x55;

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::serial::protocol::{encode, hex_pair};
pub use crate::serial::protocol::{ActionCode, CodecInput, Frame};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("command {command} declares no actions")]
    EmptyCommand { command: String },

    #[error("command name {0:?} has no usable characters")]
    BlankCommand(String),

    #[error("variant {variant:?} of {command} has no usable characters")]
    BlankVariant { command: String, variant: String },

    #[error("command {0} is declared more than once")]
    DuplicateCommand(String),

    #[error("command {command} declares more than one {action} action")]
    DuplicateAction { command: String, action: String },

    #[error("set action of {command} has no variants")]
    EmptySet { command: String },

    #[error("variant {variant} of {command} is declared more than once")]
    DuplicateVariant { command: String, variant: String },

    #[error("response label {label} of {command} is declared more than once")]
    DuplicateResponseLabel { command: String, label: String },

    #[error("response value {value} of {command} maps to both {first} and {second}")]
    DuplicateResponseValue {
        command: String,
        value: String,
        first: String,
        second: String,
    },

    #[error("{second} reuses the codec inputs of {first} ({input})")]
    DuplicateCodecInput {
        first: String,
        second: String,
        input: String,
    },

    #[error("{method} {path} is derived by both {first} and {second}")]
    DuplicateRoute {
        method: String,
        path: String,
        first: String,
        second: String,
    },

    #[error("operation id {0} is derived more than once")]
    DuplicateOperationId(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Adjustment actions that take no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenericOp {
    Increment,
    Decrement,
    Execute,
}

impl GenericOp {
    pub fn code(self) -> ActionCode {
        match self {
            GenericOp::Increment => ActionCode::Increment,
            GenericOp::Decrement => ActionCode::Decrement,
            GenericOp::Execute => ActionCode::Execute,
        }
    }
}

/// One named value of a set action, e.g. `RGB1` for `Input`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub input: CodecInput,
    /// Replaces the generated summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseLabel {
    pub label: String,
    #[serde(with = "hex_pair")]
    pub value: [u8; 2],
}

/// Known values a get action can answer with, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseMap(Vec<ResponseLabel>);

impl ResponseMap {
    pub fn new(labels: Vec<ResponseLabel>) -> Self {
        Self(labels)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponseLabel> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn value_of(&self, label: &str) -> Option<[u8; 2]> {
        self.0.iter().find(|l| l.label == label).map(|l| l.value)
    }

    /// Look up the label for a raw reply, either a bare value or a data reply.
    pub fn label_for(&self, raw: &[u8]) -> Option<&str> {
        let value = crate::serial::protocol::DeviceReply::value(raw)?;
        self.0
            .iter()
            .find(|l| l.value == value)
            .map(|l| l.label.as_str())
    }
}

impl<'a> FromIterator<(&'a str, [u8; 2])> for ResponseMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, [u8; 2])>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(label, value)| ResponseLabel {
                    label: label.to_string(),
                    value,
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionKind {
    Set {
        variants: Vec<Variant>,
    },
    Get {
        input: CodecInput,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        responses: Option<ResponseMap>,
    },
    Generic {
        op: GenericOp,
        input: CodecInput,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Set { .. } => "set",
            ActionKind::Get { .. } => "get",
            ActionKind::Generic { op, .. } => op.code().as_str(),
        }
    }

    /// Every (variant, action code, inputs) this action encodes.
    pub fn inputs(&self) -> Vec<(Option<&str>, ActionCode, &CodecInput)> {
        match self {
            ActionKind::Set { variants } => variants
                .iter()
                .map(|v| (Some(v.name.as_str()), ActionCode::Set, &v.input))
                .collect(),
            ActionKind::Get { input, .. } => vec![(None, ActionCode::Get, input)],
            ActionKind::Generic { op, input } => vec![(None, op.code(), input)],
        }
    }
}

/// One controllable aspect of the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub name: String,
    /// Replaces the name-derived slug in operation ids and paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Base path used instead of `/{slug}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Human wording used in summaries; defaults to the lowercased name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Grouping tag; defaults to the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Surface `execute` as itself rather than as a reset.
    #[serde(default)]
    pub self_describing: bool,
    pub actions: Vec<ActionKind>,
}

impl CommandEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            path: None,
            subject: None,
            tag: None,
            self_describing: false,
            actions: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn self_describing(mut self) -> Self {
        self.self_describing = true;
        self
    }

    pub fn set<'a>(mut self, variants: impl IntoIterator<Item = (&'a str, CodecInput)>) -> Self {
        let variants = variants
            .into_iter()
            .map(|(name, input)| Variant {
                name: name.to_string(),
                input,
                summary: None,
                description: None,
            })
            .collect();
        self.actions.push(ActionKind::Set { variants });
        self
    }

    pub fn get(mut self, input: CodecInput, responses: Option<ResponseMap>) -> Self {
        self.actions.push(ActionKind::Get { input, responses });
        self
    }

    pub fn generic(mut self, op: GenericOp, input: CodecInput) -> Self {
        self.actions.push(ActionKind::Generic { op, input });
        self
    }

    /// Custom summary and description for one variant of the set action.
    pub fn wording(mut self, variant: &str, summary: &str, description: &str) -> Self {
        let variants = self.actions.iter_mut().find_map(|action| match action {
            ActionKind::Set { variants } => Some(variants),
            _ => None,
        });
        if let Some(v) = variants.and_then(|vs| vs.iter_mut().find(|v| v.name == variant)) {
            v.summary = Some(summary.to_string());
            v.description = Some(description.to_string());
        }
        self
    }

    /// Identifier fragment used in operation ids and paths.
    pub fn slug(&self) -> String {
        match &self.alias {
            Some(alias) => slugify(alias),
            None => slugify(&self.name),
        }
    }

    pub fn base_path(&self) -> String {
        match &self.path {
            Some(path) => path.trim_end_matches('/').to_string(),
            None => format!("/{}", self.slug()),
        }
    }

    pub fn tag_text(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.name)
    }

    pub fn subject_text(&self) -> String {
        match &self.subject {
            Some(subject) => subject.clone(),
            None => self.name.to_lowercase().replace(['-', '_'], " "),
        }
    }
}

/// Lowercase, with runs of whitespace, dashes, slashes and underscores
/// collapsed into one `-`. Leading and trailing separators are dropped.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.trim().chars() {
        if ch.is_whitespace() || matches!(ch, '_' | '/' | '-') {
            pending_dash = true;
            continue;
        }
        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        slug.extend(ch.to_lowercase());
    }
    slug
}

/// Where a frame came from, for error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOrigin {
    pub command: String,
    pub action: ActionCode,
    pub variant: Option<String>,
}

impl fmt::Display for FrameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.command, self.action)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// The full command table for one device family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CommandEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CommandEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    /// Every frame the catalog can produce, in declaration order.
    pub fn frames(&self) -> Vec<(FrameOrigin, Frame)> {
        let mut frames = Vec::new();
        for entry in &self.entries {
            for action in &entry.actions {
                for (variant, code, input) in action.inputs() {
                    let origin = FrameOrigin {
                        command: entry.name.clone(),
                        action: code,
                        variant: variant.map(str::to_string),
                    };
                    frames.push((origin, encode(code, input)));
                }
            }
        }
        frames
    }

    /// Check the structural invariants of every entry and global uniqueness
    /// of codec inputs.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut inputs: HashMap<CodecInput, FrameOrigin> = HashMap::new();

        for entry in &self.entries {
            if !names.insert(entry.name.to_lowercase()) {
                return Err(CatalogError::DuplicateCommand(entry.name.clone()));
            }
            validate_entry(entry)?;

            for action in &entry.actions {
                for (variant, code, input) in action.inputs() {
                    let origin = FrameOrigin {
                        command: entry.name.clone(),
                        action: code,
                        variant: variant.map(str::to_string),
                    };
                    if let Some(first) = inputs.get(input) {
                        return Err(CatalogError::DuplicateCodecInput {
                            first: first.to_string(),
                            second: origin.to_string(),
                            input: format!(
                                "crc {}, class {}, code {}",
                                hex::encode(input.crc),
                                hex::encode(input.class),
                                hex::encode(input.code)
                            ),
                        });
                    }
                    inputs.insert(*input, origin);
                }
            }
        }

        Ok(())
    }
}

fn validate_entry(entry: &CommandEntry) -> Result<()> {
    if entry.slug().is_empty() {
        return Err(CatalogError::BlankCommand(entry.name.clone()));
    }
    if entry.actions.is_empty() {
        return Err(CatalogError::EmptyCommand {
            command: entry.name.clone(),
        });
    }

    let mut kinds = HashSet::new();
    for action in &entry.actions {
        if !kinds.insert(action.name()) {
            return Err(CatalogError::DuplicateAction {
                command: entry.name.clone(),
                action: action.name().to_string(),
            });
        }

        match action {
            ActionKind::Set { variants } => {
                if variants.is_empty() {
                    return Err(CatalogError::EmptySet {
                        command: entry.name.clone(),
                    });
                }
                let mut seen = HashSet::new();
                for variant in variants {
                    let slug = slugify(&variant.name);
                    if slug.is_empty() {
                        return Err(CatalogError::BlankVariant {
                            command: entry.name.clone(),
                            variant: variant.name.clone(),
                        });
                    }
                    if !seen.insert(slug) {
                        return Err(CatalogError::DuplicateVariant {
                            command: entry.name.clone(),
                            variant: variant.name.clone(),
                        });
                    }
                }
            }
            ActionKind::Get {
                responses: Some(responses),
                ..
            } => validate_responses(&entry.name, responses)?,
            ActionKind::Get { responses: None, .. } | ActionKind::Generic { .. } => {}
        }
    }

    Ok(())
}

fn validate_responses(command: &str, responses: &ResponseMap) -> Result<()> {
    let mut labels = HashSet::new();
    let mut values: HashMap<[u8; 2], &str> = HashMap::new();

    for entry in responses.iter() {
        if !labels.insert(entry.label.as_str()) {
            return Err(CatalogError::DuplicateResponseLabel {
                command: command.to_string(),
                label: entry.label.clone(),
            });
        }
        if let Some(first) = values.insert(entry.value, entry.label.as_str()) {
            return Err(CatalogError::DuplicateResponseValue {
                command: command.to_string(),
                value: hex::encode(entry.value),
                first: first.to_string(),
                second: entry.label.clone(),
            });
        }
    }

    Ok(())
}
