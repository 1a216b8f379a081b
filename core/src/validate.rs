//! Transaction validation.
//!
//! Checks the structural contract of a [`Transaction`] before any command
//! touches the database: Close must travel alone, SQL-bearing commands need
//! text, and a parameter slot may be bound only once per command.
//!
//! # Examples
//!
//! ```
//! use dbcommand_core::*;
//!
//! let tx = Transaction::new(1, 1).with_command(Command::read("SELECT 1"));
//! assert!(validate_transaction(&tx).is_empty());
//!
//! // Invalid: Close mixed with other commands
//! let bad = Transaction::new(1, 1)
//!     .with_command(Command::initialize())
//!     .with_command(Command::close());
//! assert!(!validate_transaction(&bad).is_empty());
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::{CommandType, Transaction};

/// Transaction validation errors.
///
/// Each variant describes a specific contract violation. `position` is the
/// zero-based position of the offending command within the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A Close command appears in a batch with other commands.
    #[error("close must be the only command in a transaction, found {commands} commands")]
    CloseNotAlone { commands: usize },
    /// A Read, Execute or Run command has blank SQL text.
    #[error("command {position} ({command_type:?}) has no SQL text")]
    MissingText {
        position: usize,
        command_type: CommandType,
    },
    /// Two bindings of the same command target one parameter slot.
    #[error("command {position} binds parameter {index} more than once")]
    DuplicateBinding { position: usize, index: usize },
}

/// Validates a transaction, returning every violation found.
///
/// An empty vector means the batch is structurally sound. Binding indices
/// beyond the statement's parameter count can only be detected once the
/// statement is prepared, so they are not reported here.
pub fn validate_transaction(transaction: &Transaction) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let commands = &transaction.commands;

    if commands.len() > 1
        && commands
            .iter()
            .any(|c| c.command_type == CommandType::Close)
    {
        errors.push(ValidationError::CloseNotAlone {
            commands: commands.len(),
        });
    }

    for (position, command) in commands.iter().enumerate() {
        if command.command_type.requires_text() && command.text.trim().is_empty() {
            errors.push(ValidationError::MissingText {
                position,
                command_type: command.command_type,
            });
        }

        let mut seen = HashSet::new();
        for binding in &command.bindings {
            if !seen.insert(binding.index) {
                errors.push(ValidationError::DuplicateBinding {
                    position,
                    index: binding.index,
                });
            }
        }
    }

    errors
}
