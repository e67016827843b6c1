//! # print-ingest
//!
//! Multi-format 3D asset ingestion for print ordering.
//!
//! An upload arrives as a bundle of named byte buffers: a lone STL, an OBJ
//! with its material library and textures, a glTF with external buffers, or
//! a zip holding any of these. This crate turns such a bundle into one
//! normalized scene graph and binds print settings to it.
//!
//! ## Stages
//!
//! 1. [`archive`] expands zip entries into a flat [`AssetBundle`]
//! 2. [`classify`] picks the primary model by extension precedence
//! 3. [`decode`] parses STL, PLY, 3MF, OBJ, glTF or GLB, resolving sibling
//!    files through a [`ReferenceResolver`]
//! 4. [`normalize`] guarantees every mesh a unique name and a material
//! 5. [`print_config`] attaches color overrides and slicer settings
//!
//! [`Pipeline`] runs stages 1 to 4; [`IngestionSession`] holds the result
//! for concurrent readers and discards results of superseded ingestions.
//!
//! Recoverable problems (a corrupt archive next to a good model, a missing
//! texture) are returned as [`Warning`]s next to the result, and a failed
//! ingestion returns them inside its [`IngestFailure`]. Nothing is read
//! from the filesystem or network.
//!
//! ## Example
//!
//! ```
//! use print_ingest::{AssetBundle, Color, Pipeline, PrintConfiguration};
//!
//! # fn main() -> Result<(), print_ingest::Error> {
//! let obj = "o Lid\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 1 2 3\no Base\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 4 5 6\n";
//! let bundle = AssetBundle::single("box.obj", obj.as_bytes().to_vec());
//!
//! let ingested = Pipeline::new().ingest(&bundle)?;
//! let names = ingested.scene.mesh_names();
//!
//! let config = PrintConfiguration::create_default(&ingested.scene)
//!     .apply_mesh_color(&names, "Lid", Color::rgb(255, 0, 0))?
//!     .finalize();
//!
//! assert!(config.is_configured);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod bundle;
pub mod classify;
pub mod context;
pub mod decode;
pub mod error;
pub mod format;
pub mod normalize;
pub mod pipeline;
pub mod print_config;
pub mod resolve;
pub mod scene;

pub use archive::{ArchiveConfig, Expanded, expand, expand_with_config};
pub use bundle::{AssetBundle, normalize_path};
pub use classify::select_primary;
pub use context::{
    CommitOutcome, IngestionContext, IngestionSession, IngestionTarget, IngestionTicket,
};
pub use decode::{DecodeOptions, DecodedScene, decode, decode_with_resolver};
pub use error::{Error, IngestFailure, Result, Warning};
pub use format::{FormatFamily, ModelFormat, RecognizedExtensions};
pub use normalize::NormalizeReport;
pub use pipeline::{IngestedScene, Pipeline, PipelineConfig};
pub use print_config::{MaterialType, PlateType, PrintConfiguration, PrintSettings, SupportType};
pub use resolve::{BundleResolver, NoReferences, ReferenceResolver, Resolved};
pub use scene::{
    Color, Geometry, Group, Material, Mesh, MeshNameSet, SceneGraph, SceneNode, TextureImage,
};
