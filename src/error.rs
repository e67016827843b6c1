//! Error and warning types for asset ingestion
//!
//! Fatal conditions are reported through [`Error`]; conditions the pipeline
//! recovers from are collected as [`Warning`]s and returned next to the
//! successful result. Both carry stable codes so hosts can map them to
//! user-facing messages.
//!
//! # Error Codes
//!
//! Error codes follow the pattern: `E<category><number>`
//!
//! Categories:
//! - **E1xxx**: I/O and archive errors
//! - **E2xxx**: Model discovery and decoding errors
//! - **E3xxx**: Print configuration errors
//!
//! ## Common Error Codes
//!
//! - `E1001`: I/O error reading a buffer
//! - `E1002`: ZIP container error inside a model format
//! - `E2001`: No recognized model in the bundle
//! - `E2002`: Recognized extension without a decoder
//! - `E2003`: The decoder rejected the primary buffer
//! - `E2004`: XML error inside a model part
//! - `E3001`: Color override names an unknown mesh
//! - `E3002`: Print settings out of range
//! - `E3003`: Configuration (de)serialization failed
//!
//! # Warning Codes
//!
//! - `W1001`..`W1004`: archive expansion
//! - `W2001`..`W2004`: reference resolution and decoding

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting a bundle or editing a print configuration
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred while reading a buffer
    ///
    /// **Error Code**: E1001
    #[error("[E1001] I/O error: {0}")]
    Io(#[from] io::Error),

    /// ZIP container error inside a zip-based model format (3MF)
    ///
    /// **Error Code**: E1002
    ///
    /// Plain `.zip` uploads never produce this error; the archive expander
    /// downgrades them to [`Warning::ArchiveSkipped`].
    #[error("[E1002] ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// No entry of the bundle carries a recognized model extension
    ///
    /// **Error Code**: E2001
    ///
    /// This is the expected state before any file has been chosen; hosts
    /// should render "nothing yet" rather than an error banner.
    #[error("[E2001] No 3D model found among {entry_count} bundle entries")]
    NoModelFound {
        /// Number of entries that were inspected
        entry_count: usize,
    },

    /// The primary entry's extension is recognized but no decoder handles it
    ///
    /// **Error Code**: E2002
    ///
    /// **Common Causes**:
    /// - The recognized-extension list names a format this build cannot decode
    ///
    /// **Suggestions**:
    /// - Export the model as STL, OBJ, PLY, 3MF, glTF or GLB
    #[error("[E2002] Unsupported model format '.{extension}'. Export the model as STL, OBJ, PLY, 3MF, glTF or GLB")]
    UnsupportedFormat {
        /// The offending extension, lowercase, without the dot
        extension: String,
    },

    /// The decoder rejected the bytes of the primary entry
    ///
    /// **Error Code**: E2003
    ///
    /// **Common Causes**:
    /// - Corrupted or truncated upload
    /// - File saved with the wrong extension
    ///
    /// **Suggestions**:
    /// - Re-upload the file; retrying the same bytes reproduces the failure
    #[error("[E2003] Failed to decode '{path}': {reason}")]
    DecodeFailure {
        /// Bundle path of the entry that failed
        path: String,
        /// Parser-provided reason
        reason: String,
    },

    /// XML error inside a model part
    ///
    /// **Error Code**: E2004
    #[error("[E2004] XML error: {0}")]
    Xml(String),

    /// A color override named a mesh that is not in the current scene
    ///
    /// **Error Code**: E3001
    ///
    /// **Suggestions**:
    /// - Refresh the mesh-name list from the current scene and retry
    #[error("[E3001] Unknown mesh '{0}'. Refresh the mesh list from the current scene")]
    InvalidMeshReference(String),

    /// Print settings failed range validation
    ///
    /// **Error Code**: E3002
    #[error("[E3002] Invalid print settings: {0}")]
    InvalidSettings(String),

    /// Print configuration could not be serialized or deserialized
    ///
    /// **Error Code**: E3003
    #[error("[E3003] Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::Xml(format!("Attribute parsing failed: {}", err))
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        Error::Xml(format!("Failed to parse floating-point number: {}", err))
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::Xml(format!("Failed to parse integer: {}", err))
    }
}

impl Error {
    /// Create a DecodeFailure for a bundle path
    ///
    /// # Arguments
    /// * `path` - Bundle path of the primary entry
    /// * `reason` - Anything displayable describing the failure
    pub fn decode_failure(path: &str, reason: impl fmt::Display) -> Self {
        Error::DecodeFailure {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an Xml error for a missing required attribute
    ///
    /// # Example
    /// ```ignore
    /// Error::missing_attribute("vertex", "x")
    /// ```
    pub fn missing_attribute(element: &str, attribute: &str) -> Self {
        Error::Xml(format!(
            "Element '<{}>' is missing required attribute '{}'",
            element, attribute
        ))
    }

    /// Whether this error aborts the ingestion attempt
    ///
    /// [`Error::NoModelFound`] is the expected pre-upload state, and the
    /// configuration errors are recoverable by the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::NoModelFound { .. }
                | Error::InvalidMeshReference(_)
                | Error::InvalidSettings(_)
        )
    }

    /// Stable error code, e.g. `"E2003"`
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "E1001",
            Error::Zip(_) => "E1002",
            Error::NoModelFound { .. } => "E2001",
            Error::UnsupportedFormat { .. } => "E2002",
            Error::DecodeFailure { .. } => "E2003",
            Error::Xml(_) => "E2004",
            Error::InvalidMeshReference(_) => "E3001",
            Error::InvalidSettings(_) => "E3002",
            Error::Serialization(_) => "E3003",
        }
    }
}

/// A failed ingestion and the warnings collected before it failed
///
/// A corrupt archive that left nothing to decode, or a scene whose only
/// buffer is missing, is explained by its warnings more than by the error.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct IngestFailure {
    /// What stopped the ingestion
    #[source]
    pub error: Error,
    /// Warnings from the stages that ran, in stage order
    pub warnings: Vec<Warning>,
}

impl IngestFailure {
    /// Failure carrying the warnings gathered so far
    pub fn new(error: Error, warnings: Vec<Warning>) -> Self {
        Self { error, warnings }
    }

    /// Stable code of the underlying error
    pub fn code(&self) -> &'static str {
        self.error.code()
    }

    /// Whether the underlying error aborts the ingestion attempt
    pub fn is_fatal(&self) -> bool {
        self.error.is_fatal()
    }
}

impl From<IngestFailure> for Error {
    fn from(failure: IngestFailure) -> Self {
        failure.error
    }
}

/// Non-fatal condition reported alongside a successful result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// An archive entry could not be expanded and was dropped
    ///
    /// **Warning Code**: W1001
    ArchiveSkipped {
        /// Bundle path of the archive
        path: String,
        /// Why it was skipped
        reason: String,
    },

    /// An archive inside an archive was kept unexpanded
    ///
    /// **Warning Code**: W1002
    NestedArchiveNotExpanded {
        /// Path of the inner archive in the expanded bundle
        path: String,
    },

    /// An archive entry name pointed outside the archive root
    ///
    /// **Warning Code**: W1003
    UnsafeArchivePath {
        /// Path of the containing archive
        archive: String,
        /// The rejected entry name
        entry: String,
    },

    /// An archive entry collided with an existing bundle key and was dropped
    ///
    /// **Warning Code**: W1004
    DuplicateEntry {
        /// The colliding key
        path: String,
    },

    /// A scene referenced a sibling file that is not in the bundle
    ///
    /// **Warning Code**: W2001
    MissingReference {
        /// The reference as written in the model file
        reference: String,
        /// What referenced it (e.g. `"buffer 0"`, `"mtllib"`)
        referenced_by: String,
    },

    /// Several bundle entries matched one reference; the first was used
    ///
    /// **Warning Code**: W2002
    AmbiguousReference {
        /// The reference as written in the model file
        reference: String,
        /// The entry that was used
        chosen: String,
        /// Every matching entry, in bundle order
        candidates: Vec<String>,
    },

    /// A primitive had no readable geometry and was left out of the scene
    ///
    /// **Warning Code**: W2003
    EmptyPrimitiveSkipped {
        /// Mesh name (possibly empty) and primitive index
        mesh: String,
        /// Why it was skipped
        reason: String,
    },

    /// Triangles of one object named different materials; one was applied
    /// to the whole mesh
    ///
    /// **Warning Code**: W2004
    MixedTriangleMaterials {
        /// Object name, or its id when unnamed
        object: String,
    },
}

impl Warning {
    /// Stable warning code, e.g. `"W2001"`
    pub fn code(&self) -> &'static str {
        match self {
            Warning::ArchiveSkipped { .. } => "W1001",
            Warning::NestedArchiveNotExpanded { .. } => "W1002",
            Warning::UnsafeArchivePath { .. } => "W1003",
            Warning::DuplicateEntry { .. } => "W1004",
            Warning::MissingReference { .. } => "W2001",
            Warning::AmbiguousReference { .. } => "W2002",
            Warning::EmptyPrimitiveSkipped { .. } => "W2003",
            Warning::MixedTriangleMaterials { .. } => "W2004",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.code())?;
        match self {
            Warning::ArchiveSkipped { path, reason } => {
                write!(f, "Archive '{}' could not be expanded: {}", path, reason)
            }
            Warning::NestedArchiveNotExpanded { path } => {
                write!(f, "Nested archive '{}' was not expanded", path)
            }
            Warning::UnsafeArchivePath { archive, entry } => {
                write!(f, "Entry '{}' in '{}' escapes the archive root", entry, archive)
            }
            Warning::DuplicateEntry { path } => {
                write!(f, "Duplicate entry '{}' ignored", path)
            }
            Warning::MissingReference {
                reference,
                referenced_by,
            } => write!(
                f,
                "Missing file '{}' referenced by {}",
                reference, referenced_by
            ),
            Warning::AmbiguousReference {
                reference,
                chosen,
                candidates,
            } => write!(
                f,
                "Reference '{}' matched {} files, using '{}'",
                reference,
                candidates.len(),
                chosen
            ),
            Warning::EmptyPrimitiveSkipped { mesh, reason } => {
                write!(f, "Skipped geometry of '{}': {}", mesh, reason)
            }
            Warning::MixedTriangleMaterials { object } => write!(
                f,
                "Object '{}' has per-triangle materials; one material was used for all",
                object
            ),
        }
    }
}

/// Log a warning and push it onto a collection
pub(crate) fn report(warnings: &mut Vec<Warning>, warning: Warning) {
    tracing::warn!(code = warning.code(), "{}", warning);
    warnings.push(warning);
}
