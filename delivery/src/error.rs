//! Error types and result definitions for delivery operations.
//!
//! [`DeliveryError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail and source, and the callsite where it was created. Several errors can be
//! aggregated into one, which is how lane failures collected during a producer shutdown are
//! reported.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for delivery operations using [`DeliveryError`] as the error type.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Detailed payload stored for single [`DeliveryError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for delivery operations.
#[derive(Debug, Clone)]
pub struct DeliveryError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, e.g. from several lanes failing at once.
    Many {
        errors: Vec<DeliveryError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur while delivering messages.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Producer lifecycle errors
    ProducerStartFailed,
    ProducerShutdownFailed,
    LaneWorkerPanic,

    // Progress tracking errors
    CheckpointFailed,
    CheckpointLoadFailed,

    // Codec errors
    DecodeFailed,
    EncodeFailed,
    SerializationError,
    DeserializationError,

    // Stream errors
    PublishLimitExceeded,
    TopicNotFound,
    ShardNotFound,

    // Configuration & IO errors
    ConfigError,
    IoError,

    // State errors
    InvalidState,

    // Unknown / Uncategorized
    Unknown,
}

impl DeliveryError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    ///
    /// For multiple errors, returns the description of the first error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.description())
                .unwrap_or("multiple errors"),
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`DeliveryError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        DeliveryError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    /// Creates a [`DeliveryError`] wrapping a foreign error, using its message as detail.
    #[track_caller]
    fn wrap<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        DeliveryError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for DeliveryError {
    fn eq(&self, other: &DeliveryError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail", detail)?;
                }

                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_indented(f, "Backtrace", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes a labelled, indented multi-line block.
fn write_indented(f: &mut fmt::Formatter<'_>, label: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {label}:")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`DeliveryError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for DeliveryError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> DeliveryError {
        DeliveryError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`DeliveryError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for DeliveryError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> DeliveryError {
        DeliveryError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates a vector of errors; a single error is returned unwrapped.
impl<E> From<Vec<E>> for DeliveryError
where
    E: Into<DeliveryError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> DeliveryError {
        let location = Location::caller();

        let mut errors: Vec<DeliveryError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        DeliveryError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`DeliveryError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for DeliveryError {
    #[track_caller]
    fn from(err: std::io::Error) -> DeliveryError {
        DeliveryError::wrap(ErrorKind::IoError, "I/O operation failed", err)
    }
}

/// Converts [`serde_json::Error`] to [`DeliveryError`], distinguishing I/O from data errors.
impl From<serde_json::Error> for DeliveryError {
    #[track_caller]
    fn from(err: serde_json::Error) -> DeliveryError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        DeliveryError::wrap(kind, description, err)
    }
}

/// Converts [`base64::DecodeError`] to [`DeliveryError`] with [`ErrorKind::DeserializationError`].
impl From<base64::DecodeError> for DeliveryError {
    #[track_caller]
    fn from(err: base64::DecodeError) -> DeliveryError {
        DeliveryError::wrap(
            ErrorKind::DeserializationError,
            "Base64 payload decoding failed",
            err,
        )
    }
}

/// Converts [`chrono::ParseError`] to [`DeliveryError`] with [`ErrorKind::DeserializationError`].
impl From<chrono::ParseError> for DeliveryError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> DeliveryError {
        DeliveryError::wrap(
            ErrorKind::DeserializationError,
            "Timestamp parsing failed",
            err,
        )
    }
}

/// Converts [`delivery_config::shared::ValidationError`] to [`DeliveryError`] with [`ErrorKind::ConfigError`].
impl From<delivery_config::shared::ValidationError> for DeliveryError {
    #[track_caller]
    fn from(err: delivery_config::shared::ValidationError) -> DeliveryError {
        DeliveryError::wrap(ErrorKind::ConfigError, "Invalid configuration", err)
    }
}
