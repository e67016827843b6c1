//! The ingestion pipeline: expand → classify → decode → normalize

use crate::archive::{ArchiveConfig, expand_with_config};
use crate::bundle::{AssetBundle, file_name, parent_dir};
use crate::classify::select_primary;
use crate::decode::decode_collecting;
use crate::error::{Error, IngestFailure, Warning};
use crate::format::{ModelFormat, RecognizedExtensions};
use crate::normalize::{NormalizeReport, normalize};
use crate::resolve::BundleResolver;
use crate::scene::SceneGraph;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pipeline configuration
///
/// Built with chained `with_*` calls, or deserialized from host
/// configuration where every field is optional.
///
/// # Example
///
/// ```
/// use print_ingest::PipelineConfig;
///
/// let config = PipelineConfig::new()
///     .with_recognized_extensions(["3mf", "stl"])
///     .with_max_archive_entries(500);
///
/// assert_eq!(config.recognized_extensions.as_slice(), ["3mf", "stl"]);
/// assert!(config.expand_archives);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model extensions in precedence order
    pub recognized_extensions: RecognizedExtensions,
    /// Whether archive entries are expanded before classification
    pub expand_archives: bool,
    /// Archive extensions and decompression limits
    pub archive: ArchiveConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recognized_extensions: RecognizedExtensions::default(),
            expand_archives: true,
            archive: ArchiveConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the recognized model extensions (earlier wins)
    pub fn with_recognized_extensions<S: AsRef<str>>(
        mut self,
        extensions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.recognized_extensions = RecognizedExtensions::new(extensions);
        self
    }

    /// Treat another extension as an archive
    ///
    /// Only zip containers can be read: a file with this extension that is
    /// not a zip is skipped with [`Warning::ArchiveSkipped`]. Useful for
    /// zip-based containers saved under another name.
    pub fn with_archive_extension(mut self, extension: &str) -> Self {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if !self.archive.extensions.contains(&extension) {
            self.archive.extensions.push(extension);
        }
        self
    }

    /// Cap the files taken from one archive
    pub fn with_max_archive_entries(mut self, max: usize) -> Self {
        self.archive.max_entries = max;
        self
    }

    /// Cap the decompressed bytes taken from one archive
    pub fn with_max_archive_bytes(mut self, max: u64) -> Self {
        self.archive.max_total_bytes = max;
        self
    }

    /// Leave archive entries as they are
    pub fn without_archive_expansion(mut self) -> Self {
        self.expand_archives = false;
        self
    }
}

/// A decoded and normalized model, ready for display and configuration
#[derive(Debug, Clone)]
pub struct IngestedScene {
    /// Bundle path of the primary model
    pub primary_path: String,
    /// File name of the primary model for display
    pub file_name: String,
    /// Format of the primary model
    pub format: ModelFormat,
    /// The normalized scene, shared read-only
    pub scene: Arc<SceneGraph>,
    /// Whether the source carried animation clips
    pub has_animations: bool,
    /// Everything the pipeline recovered from, in stage order
    pub warnings: Vec<Warning>,
    /// Names and materials filled in by the normalizer
    pub normalize_report: NormalizeReport,
}

/// Runs ingestion stages in order
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Pipeline with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with a custom configuration
    pub fn with_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest a bundle
    ///
    /// # Errors
    ///
    /// The returned [`IngestFailure`] holds the error and every warning
    /// collected before it, such as the corrupt archive that left nothing to
    /// decode. The error is one of:
    ///
    /// - [`Error::NoModelFound`] when no entry has a recognized extension;
    ///   this is the normal state before anything was uploaded
    /// - [`Error::UnsupportedFormat`] and [`Error::DecodeFailure`] from the
    ///   decoder
    ///
    /// # Example
    ///
    /// ```
    /// use print_ingest::{AssetBundle, Pipeline};
    ///
    /// let stl = "solid t\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nvertex 0 1 0\nendloop\nendfacet\nendsolid t\n";
    /// let bundle = AssetBundle::single("part.stl", stl.as_bytes().to_vec());
    ///
    /// let ingested = Pipeline::new().ingest(&bundle).unwrap();
    /// assert_eq!(ingested.file_name, "part.stl");
    /// assert_eq!(ingested.scene.meshes()[0].name, "STL_Mesh");
    /// assert!(!ingested.has_animations);
    /// ```
    pub fn ingest(&self, bundle: &AssetBundle) -> Result<IngestedScene, IngestFailure> {
        info!(
            entries = bundle.len(),
            bytes = bundle.total_bytes(),
            "Starting ingestion"
        );
        let mut warnings = Vec::new();

        let expanded = if self.config.expand_archives {
            let expanded = expand_with_config(bundle, &self.config.archive);
            warnings.extend(expanded.warnings);
            expanded.bundle
        } else {
            bundle.clone()
        };

        let Some(primary) = select_primary(&expanded, &self.config.recognized_extensions) else {
            let error = Error::NoModelFound {
                entry_count: expanded.len(),
            };
            return Err(IngestFailure::new(error, warnings));
        };
        debug!(primary = primary.as_str(), "Selected primary model");

        let resolver = BundleResolver::new(&expanded, parent_dir(&primary));
        let (mut scene, format) =
            match decode_collecting(&expanded, &primary, &resolver, &mut warnings) {
                Ok(decoded) => decoded,
                Err(error) => {
                    warn!(
                        primary = primary.as_str(),
                        warnings = warnings.len(),
                        "Ingestion failed: {}",
                        error
                    );
                    return Err(IngestFailure::new(error, warnings));
                }
            };

        let normalize_report = normalize(&mut scene, format);

        info!(
            primary = primary.as_str(),
            format = %format,
            meshes = scene.mesh_count(),
            warnings = warnings.len(),
            "Ingestion complete"
        );

        Ok(IngestedScene {
            file_name: file_name(&primary).to_string(),
            primary_path: primary,
            format,
            has_animations: scene.has_animations(),
            scene: Arc::new(scene),
            warnings,
            normalize_report,
        })
    }
}
