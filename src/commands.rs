//! Turns catalog entries into reachable operations.
//!
//! Each present action of each entry becomes one or more [`Command`]s: an
//! [`OperationDescriptor`] for discovery plus the pre-encoded frame. A
//! [`CommandHandler`] binds a command to the open transport; the request
//! framework receives handlers through [`OperationRegistry`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{
    slugify, ActionKind, Catalog, CatalogError, CommandEntry, GenericOp, ResponseMap,
};
use crate::serial::protocol::{encode, ActionCode, CodecInput, Frame};
use crate::serial::{SerialError, SerialInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// What the request framework needs to expose and document one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDescriptor {
    pub id: String,
    pub method: Method,
    pub path: String,
    pub summary: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationShape {
    /// Selects one variant of a set action.
    Write,
    /// Reads a value; the reply may be decodable against a response map.
    Query,
    /// Increment, decrement, reset or execute.
    Adjust,
}

/// One catalog-derived operation with its frame built once.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    #[serde(flatten)]
    pub descriptor: OperationDescriptor,
    pub frame: Frame,
    pub shape: OperationShape,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses: Option<ResponseMap>,
}

impl Command {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

/// Derive every operation of `catalog`.
///
/// Nothing is returned unless the whole catalog validates and every derived
/// route and operation id is unique.
pub fn derive_operations(catalog: &Catalog) -> Result<Vec<Command>, CatalogError> {
    catalog.validate()?;

    let mut commands = Vec::new();
    for entry in catalog.entries() {
        for action in &entry.actions {
            derive_action(entry, action, &mut commands);
        }
    }

    check_unique(&commands)?;
    Ok(commands)
}

fn derive_action(entry: &CommandEntry, action: &ActionKind, out: &mut Vec<Command>) {
    let slug = entry.slug();
    let base = entry.base_path();
    let subject = entry.subject_text();
    let tag = entry.tag_text().to_string();

    match action {
        ActionKind::Set { variants } => {
            for variant in variants {
                let variant_slug = slugify(&variant.name);
                out.push(build(
                    format!("{slug}-{variant_slug}"),
                    Method::Post,
                    format!("{base}/{variant_slug}"),
                    variant
                        .summary
                        .clone()
                        .unwrap_or_else(|| format!("Set {subject} to {}", variant.name)),
                    variant.description.clone().unwrap_or_else(|| {
                        format!("Sets the projector's {subject} to {}", variant.name)
                    }),
                    vec![tag.clone(), "Set".to_string()],
                    ActionCode::Set,
                    &variant.input,
                    OperationShape::Write,
                    None,
                ));
            }
        }
        ActionKind::Get { input, responses } => {
            out.push(build(
                format!("{slug}-get"),
                Method::Get,
                format!("{base}/get"),
                format!("Get {subject}"),
                format!("Retrieves the projector's {subject}"),
                vec![tag, "Get".to_string()],
                ActionCode::Get,
                input,
                OperationShape::Query,
                responses.clone().filter(|r| !r.is_empty()),
            ));
        }
        ActionKind::Generic { op, input } => {
            let (name, verb) = generic_wording(*op, entry.self_describing);
            let title = capitalize(name);
            out.push(build(
                format!("{slug}-{name}"),
                Method::Post,
                format!("{base}/{name}"),
                format!("{title} {subject}"),
                format!("{verb} the projector's {subject}"),
                vec![tag, title],
                op.code(),
                input,
                OperationShape::Adjust,
                None,
            ));
        }
    }
}

/// Path segment and description verb for an adjustment.
fn generic_wording(op: GenericOp, self_describing: bool) -> (&'static str, &'static str) {
    match op {
        GenericOp::Increment => ("increment", "Increments"),
        GenericOp::Decrement => ("decrement", "Decrements"),
        GenericOp::Execute if self_describing => ("execute", "Executes"),
        GenericOp::Execute => ("reset", "Resets"),
    }
}

#[allow(clippy::too_many_arguments)]
fn build(
    id: String,
    method: Method,
    path: String,
    summary: String,
    description: String,
    tags: Vec<String>,
    action: ActionCode,
    input: &CodecInput,
    shape: OperationShape,
    responses: Option<ResponseMap>,
) -> Command {
    let frame = encode(action, input);
    Command {
        descriptor: OperationDescriptor {
            id,
            method,
            path,
            summary,
            description: format!("{description}\n\nRaw command: 0x{}", frame.to_hex()),
            tags,
        },
        frame,
        shape,
        responses,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn check_unique(commands: &[Command]) -> Result<(), CatalogError> {
    let mut routes: HashMap<(Method, &str), &str> = HashMap::new();
    let mut ids = HashSet::new();

    for command in commands {
        let d = &command.descriptor;
        if let Some(first) = routes.insert((d.method, d.path.as_str()), d.id.as_str()) {
            return Err(CatalogError::DuplicateRoute {
                method: d.method.to_string(),
                path: d.path.clone(),
                first: first.to_string(),
                second: d.id.clone(),
            });
        }
        if !ids.insert(d.id.as_str()) {
            return Err(CatalogError::DuplicateOperationId(d.id.clone()));
        }
    }

    Ok(())
}

/// Body returned to the caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// Hex encoded response bytes.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// A failed invocation, with the frame that was attempted.
#[derive(Debug, thiserror::Error)]
#[error("operation {operation} failed (frame 0x{frame}): {source}")]
pub struct InvokeError {
    pub operation: String,
    pub frame: Frame,
    #[source]
    pub source: SerialError,
}

/// A command bound to the open transport.
#[derive(Clone)]
pub struct CommandHandler {
    command: Arc<Command>,
    transport: Arc<SerialInterface>,
    deadline: Option<Duration>,
}

impl CommandHandler {
    pub fn new(command: Arc<Command>, transport: Arc<SerialInterface>) -> Self {
        Self {
            command,
            transport,
            deadline: None,
        }
    }

    /// Abandon the transaction when it takes longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.command.descriptor
    }

    pub fn command(&self) -> &Arc<Command> {
        &self.command
    }

    pub fn transport(&self) -> &Arc<SerialInterface> {
        &self.transport
    }

    /// Run one transaction and report the raw reply.
    pub async fn call(&self) -> Result<Reply, InvokeError> {
        let frame = self.command.frame;
        log::debug!("Invoking {} (frame 0x{})", self.command.id(), frame);
        let result = match self.deadline {
            Some(deadline) => self.transport.transact_within(&frame, deadline).await,
            None => self.transport.transact(&frame).await,
        };

        match result {
            Ok(response) => {
                let label = self
                    .command
                    .responses
                    .as_ref()
                    .and_then(|map| map.label_for(&response.bytes))
                    .map(str::to_string);
                Ok(Reply {
                    message: response.to_hex(),
                    label,
                    truncated: response.is_truncated(),
                })
            }
            Err(source) => {
                log::error!(
                    "Operation {} failed (frame 0x{}): {}",
                    self.command.id(),
                    frame,
                    source
                );
                Err(InvokeError {
                    operation: self.command.id().to_string(),
                    frame,
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandler")
            .field("id", &self.command.descriptor.id)
            .field("port", &self.transport.port_name())
            .finish()
    }
}

/// Seam where the request framework receives descriptor + handler pairs.
pub trait OperationRegistry {
    type Error;

    fn register(&mut self, handler: CommandHandler) -> Result<(), Self::Error>;
}

/// Bind every command to `transport` and hand it to `registry`.
pub fn register_all<R: OperationRegistry>(
    registry: &mut R,
    commands: &[Arc<Command>],
    transport: &Arc<SerialInterface>,
) -> Result<usize, R::Error> {
    for command in commands {
        log::debug!(
            "Registering {} {} ({})",
            command.descriptor.method,
            command.descriptor.path,
            command.descriptor.id
        );
        registry.register(CommandHandler::new(command.clone(), transport.clone()))?;
    }
    Ok(commands.len())
}
