//! Command dispatch.
//!
//! Commands are plain data tagged with a compile-time name. A
//! [`CommandProcessor`] routes each command to the single handler registered
//! for its name; handlers are async closures that typically load an
//! aggregate, record events, and save it through a repository.

use std::{any::Any, collections::HashMap, future::Future, pin::Pin};

use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    context::CorrelationScope,
    error::{Classification, Classify},
    id::AggregateId,
};

/// A command addressed to one aggregate.
pub trait Command: Send {
    /// Routing tag; one handler per name.
    const NAME: &'static str;

    /// The aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;

    /// The stream version the caller believes is current, when it wants the
    /// handler to enforce it.
    fn expected_version(&self) -> Option<i64> {
        None
    }
}

/// A handler failure with its classification attached, so callers can pick
/// a retry policy without knowing the handler's concrete error type.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct HandlerError {
    classification: Classification,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl HandlerError {
    /// Wrap an error under an explicit classification.
    pub fn new(
        classification: Classification,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            classification,
            source: source.into(),
        }
    }

    /// Wrap an error that carries its own classification.
    pub fn from_classified<E>(source: E) -> Self
    where
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        Self {
            classification: source.classification(),
            source: Box::new(source),
        }
    }
}

impl Classify for HandlerError {
    fn classification(&self) -> Classification {
        self.classification
    }
}

/// Error from registering a command handler under an already-taken name.
///
/// Two handlers competing for one name is a configuration defect; the first
/// registration keeps the name.
#[derive(Debug, Error)]
#[error("a handler is already registered for command `{name}`")]
pub struct DuplicateHandler {
    /// The contested command name.
    pub name: &'static str,
}

impl Classify for DuplicateHandler {
    fn classification(&self) -> Classification {
        Classification::Validation
    }
}

/// Error from executing a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No handler is registered for the command's name.
    #[error("no handler registered for command `{name}`")]
    NoHandlerFound {
        /// The unroutable command name.
        name: &'static str,
    },
    /// The name is registered, but for a different command type.
    #[error("command `{name}` is registered for a different command type")]
    HandlerTypeMismatch {
        /// The contested command name.
        name: &'static str,
    },
    /// The handler ran and failed.
    #[error("command `{name}` failed: {source}")]
    HandlerFailed {
        /// The command name.
        name: &'static str,
        /// The handler's failure.
        #[source]
        source: HandlerError,
    },
}

impl Classify for CommandError {
    fn classification(&self) -> Classification {
        match self {
            Self::NoHandlerFound { .. } | Self::HandlerTypeMismatch { .. } => {
                Classification::MissingHandler
            }
            Self::HandlerFailed { source, .. } => source.classification(),
        }
    }
}

/// A failed command execution, as reported on the processor's failure
/// channel.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    /// The command's name.
    pub command: &'static str,
    /// The failure's classification.
    pub classification: Classification,
    /// The handler's error, rendered.
    pub message: String,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
type Handler<C> = Box<dyn Fn(C) -> HandlerFuture + Send + Sync>;

/// Routes commands to their registered handlers.
pub struct CommandProcessor {
    handlers: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    failure_tx: broadcast::Sender<CommandFailure>,
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandProcessor {
    /// Create a processor with no handlers.
    #[must_use]
    pub fn new() -> Self {
        let (failure_tx, _) = broadcast::channel(16);
        Self {
            handlers: HashMap::new(),
            failure_tx,
        }
    }

    /// Register the handler for command type `C`.
    ///
    /// Each name takes exactly one handler.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateHandler`] when a handler already holds `C::NAME`;
    /// the existing handler stays in place.
    pub fn register<C, F, Fut>(&mut self, handler: F) -> Result<(), DuplicateHandler>
    where
        C: Command + 'static,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        if self.handlers.contains_key(C::NAME) {
            return Err(DuplicateHandler { name: C::NAME });
        }
        let handler: Handler<C> = Box::new(move |command| Box::pin(handler(command)));
        self.handlers.insert(C::NAME, Box::new(handler));
        Ok(())
    }

    /// Whether a handler is registered for `name`.
    #[must_use]
    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Subscribe to handler failures.
    #[must_use]
    pub fn failures(&self) -> broadcast::Receiver<CommandFailure> {
        self.failure_tx.subscribe()
    }

    /// Execute one command through its registered handler.
    ///
    /// A fresh correlation id is entered on `scope` for the duration of the
    /// handler, so everything the handler touches shares one id.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NoHandlerFound`] for an unregistered command
    /// name, [`CommandError::HandlerTypeMismatch`] when the name belongs to a
    /// different command type, and [`CommandError::HandlerFailed`] when the
    /// handler errors; handler failures are also reported on the
    /// [`failures`](Self::failures) channel.
    pub async fn execute<C: Command + 'static>(
        &self,
        command: C,
        scope: &CorrelationScope,
    ) -> Result<(), CommandError> {
        let Some(entry) = self.handlers.get(C::NAME) else {
            return Err(CommandError::NoHandlerFound { name: C::NAME });
        };
        let handler = entry
            .downcast_ref::<Handler<C>>()
            .ok_or(CommandError::HandlerTypeMismatch { name: C::NAME })?;

        let correlation = Uuid::new_v4();
        let _entered = scope.enter(correlation);
        tracing::debug!(
            command = C::NAME,
            %correlation,
            aggregate_id = %command.aggregate_id(),
            "executing command"
        );
        handler(command).await.map_err(|source| {
            tracing::error!(command = C::NAME, error = %source, "command handler failed");
            // Nobody listening is fine.
            let _ = self.failure_tx.send(CommandFailure {
                command: C::NAME,
                classification: source.classification(),
                message: source.to_string(),
            });
            CommandError::HandlerFailed {
                name: C::NAME,
                source,
            }
        })
    }
}
