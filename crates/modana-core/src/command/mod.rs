//! Named, typed, invokable commands.
//!
//! A command is registered once under a unique name (by convention
//! `extension.action`) with an ordered list of typed parameter slots and a
//! return type. Arguments are checked against the slots when the command is
//! invoked, which is what stands in for compile-time typing across
//! independently built extensions.

mod registry;
mod value;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use registry::CommandRegistry;
pub use value::{CommandValue, ValueType};

/// Handler bound to a command. Receives arguments already checked and
/// completed with defaults.
pub type CommandHandler =
    Arc<dyn Fn(&[CommandValue]) -> anyhow::Result<CommandValue> + Send + Sync>;

/// One parameter of a command signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSlot {
    pub name: String,
    pub value_type: ValueType,
    /// Used when the caller omits this (trailing) argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<CommandValue>,
}

impl ParameterSlot {
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        value_type: ValueType,
        default: impl Into<CommandValue>,
    ) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: Some(default.into()),
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// A command: name, signature, handler.
#[derive(Clone)]
pub struct CommandDescriptor {
    name: String,
    description: String,
    parameters: Vec<ParameterSlot>,
    returns: ValueType,
    owner: Option<String>,
    handler: CommandHandler,
}

impl CommandDescriptor {
    /// A command with no parameters returning `Unit`.
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[CommandValue]) -> anyhow::Result<CommandValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            returns: ValueType::Unit,
            owner: None,
            handler: Arc::new(handler),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameter(mut self, slot: ParameterSlot) -> Self {
        self.parameters.push(slot);
        self
    }

    /// Append a required parameter.
    pub fn param(self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.with_parameter(ParameterSlot::required(name, value_type))
    }

    /// Append a parameter with a default value.
    pub fn optional_param(
        self,
        name: impl Into<String>,
        value_type: ValueType,
        default: impl Into<CommandValue>,
    ) -> Self {
        self.with_parameter(ParameterSlot::optional(name, value_type, default))
    }

    pub fn returns(mut self, value_type: ValueType) -> Self {
        self.returns = value_type;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[ParameterSlot] {
        &self.parameters
    }

    pub fn return_type(&self) -> ValueType {
        self.returns
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Handler-free view of the descriptor.
    pub fn signature(&self) -> CommandSignature {
        CommandSignature {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            returns: self.returns,
            owner: self.owner.clone(),
        }
    }

    /// Structural checks done at registration time.
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("command name is empty".to_string());
        }
        let mut seen_optional = false;
        for (index, slot) in self.parameters.iter().enumerate() {
            if self.parameters[..index].iter().any(|s| s.name == slot.name) {
                return Err(format!("duplicate parameter `{}`", slot.name));
            }
            match &slot.default {
                Some(default) => {
                    if !slot.value_type.accepts(default) {
                        return Err(format!(
                            "default of `{}` is {} but the slot expects {}",
                            slot.name,
                            default.value_type(),
                            slot.value_type
                        ));
                    }
                    seen_optional = true;
                }
                None if seen_optional => {
                    return Err(format!(
                        "required parameter `{}` follows an optional one",
                        slot.name
                    ));
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Check `args` against the slots and fill omitted trailing arguments.
    fn bind(&self, args: Vec<CommandValue>) -> Result<Vec<CommandValue>, String> {
        if args.len() > self.parameters.len() {
            return Err(format!(
                "expected at most {} argument(s), got {}",
                self.parameters.len(),
                args.len()
            ));
        }

        let supplied = args.len();
        let mut bound = args;
        for (index, slot) in self.parameters.iter().enumerate() {
            if index < supplied {
                let arg = &bound[index];
                if !slot.value_type.accepts(arg) {
                    return Err(format!(
                        "argument `{}` (#{}) expects {}, got {}",
                        slot.name,
                        index + 1,
                        slot.value_type,
                        arg.value_type()
                    ));
                }
            } else if let Some(default) = &slot.default {
                bound.push(default.clone());
            } else {
                return Err(format!("missing required argument `{}`", slot.name));
            }
        }
        Ok(bound)
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Serializable description of a registered command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSignature {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Vec<ParameterSlot>,
    pub returns: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl fmt::Display for CommandSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, slot) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", slot.name, slot.value_type)?;
            if !slot.is_required() {
                f.write_str("?")?;
            }
        }
        write!(f, ") -> {}", self.returns)
    }
}

/// Payload of `COMMAND_REGISTERED` / `COMMAND_UNREGISTERED` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChange {
    pub name: String,
    pub owner: Option<String>,
}

/// Command registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Command already registered: {0}")]
    DuplicateName(String),

    #[error("Invalid command descriptor {name}: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Argument mismatch for {command}: {reason}")]
    ArgumentMismatch { command: String, reason: String },

    #[error("Command {command} failed: {message}")]
    HandlerFailed { command: String, message: String },
}
