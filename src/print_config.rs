//! Print configuration bound to an ingested scene
//!
//! A [`PrintConfiguration`] holds per-mesh color overrides and the slicer
//! parameters chosen for an order. It is a plain value: every operation
//! consumes it and returns the updated configuration, and persistence is
//! left to the host. The serialized field names and enum values are a
//! contract with downstream fulfillment tooling.

use crate::error::{Error, Result};
use crate::scene::{Color, MeshNameSet, SceneGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Print material family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialType {
    /// FDM thermoplastic
    #[default]
    Plastic,
    /// SLA/DLP photopolymer
    Resin,
    /// Sintered metal
    Metal,
    /// Binder-jetted full-color sandstone
    Sandstone,
}

/// Support structure style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportType {
    /// Branching tree supports
    Tree,
    /// Grid-based supports
    #[default]
    Normal,
}

/// Build plate surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateType {
    /// Textured PEI
    #[default]
    Textured,
    /// Smooth PEI
    Smooth,
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MaterialType::Plastic => "plastic",
            MaterialType::Resin => "resin",
            MaterialType::Metal => "metal",
            MaterialType::Sandstone => "sandstone",
        })
    }
}

/// Slicer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrintSettings {
    /// Layer height (mm)
    pub layer_height: f64,
    /// First layer height (mm)
    pub initial_layer_height: f64,
    /// Material family
    pub material_type: MaterialType,
    /// Number of perimeters
    pub wall_loops: u32,
    /// Infill pattern name, e.g. `"grid"` or `"gyroid"`
    pub infill_pattern: String,
    /// Infill density in percent
    pub infill_density: f64,
    /// Nozzle diameter (mm)
    pub nozzle_diameter: f64,
    /// Generate supports
    pub support_enabled: bool,
    /// Support style when enabled
    pub support_type: SupportType,
    /// Build plate surface
    pub print_plate: PlateType,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            layer_height: 0.2,
            initial_layer_height: 0.2,
            material_type: MaterialType::Plastic,
            wall_loops: 2,
            infill_pattern: "grid".to_string(),
            infill_density: 15.0,
            nozzle_diameter: 0.4,
            support_enabled: false,
            support_type: SupportType::Normal,
            print_plate: PlateType::Textured,
        }
    }
}

impl PrintSettings {
    /// Check value ranges
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSettings`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidSettings(format!(
                    "{} must be greater than 0, got {}",
                    name, value
                )))
            }
        }

        positive("layerHeight", self.layer_height)?;
        positive("initialLayerHeight", self.initial_layer_height)?;
        positive("nozzleDiameter", self.nozzle_diameter)?;
        if !(0.0..=100.0).contains(&self.infill_density) {
            return Err(Error::InvalidSettings(format!(
                "infillDensity must be within 0..=100, got {}",
                self.infill_density
            )));
        }
        if self.wall_loops == 0 {
            return Err(Error::InvalidSettings(
                "wallLoops must be at least 1".to_string(),
            ));
        }
        if self.infill_pattern.trim().is_empty() {
            return Err(Error::InvalidSettings(
                "infillPattern must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Color overrides and slicer settings for one ingested model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintConfiguration {
    /// Mesh name → override color
    #[serde(default)]
    pub mesh_color_overrides: BTreeMap<String, Color>,
    /// Slicer parameters
    #[serde(default)]
    pub print_settings: PrintSettings,
    /// When the configuration was last finalized
    #[serde(default)]
    pub configured_at: Option<DateTime<Utc>>,
    /// Whether [`PrintConfiguration::finalize`] has run
    #[serde(default)]
    pub is_configured: bool,
}

impl PrintConfiguration {
    /// Default settings and no overrides for a freshly ingested scene
    ///
    /// # Example
    ///
    /// ```
    /// use print_ingest::{ModelFormat, PrintConfiguration, SceneGraph};
    ///
    /// let config = PrintConfiguration::create_default(&SceneGraph::new(ModelFormat::Stl));
    /// assert!(!config.is_configured);
    /// assert!(config.mesh_color_overrides.is_empty());
    /// assert_eq!(config.print_settings.layer_height, 0.2);
    /// ```
    pub fn create_default(scene: &SceneGraph) -> Self {
        debug!(meshes = scene.mesh_count(), "Creating default print configuration");
        Self {
            mesh_color_overrides: BTreeMap::new(),
            print_settings: PrintSettings::default(),
            configured_at: None,
            is_configured: false,
        }
    }

    /// Override the color of one mesh
    ///
    /// `known_meshes` is the caller's snapshot of the current scene's mesh
    /// names, typically [`SceneGraph::mesh_names`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMeshReference`] when `mesh_name` is not in
    /// `known_meshes`; nothing is modified in that case.
    pub fn apply_mesh_color(
        mut self,
        known_meshes: &MeshNameSet,
        mesh_name: &str,
        color: Color,
    ) -> Result<Self> {
        if !known_meshes.contains(mesh_name) {
            return Err(Error::InvalidMeshReference(mesh_name.to_string()));
        }
        self.mesh_color_overrides
            .insert(mesh_name.to_string(), color);
        Ok(self)
    }

    /// Remove the override of one mesh, if any
    pub fn clear_mesh_color(mut self, mesh_name: &str) -> Self {
        self.mesh_color_overrides.remove(mesh_name);
        self
    }

    /// Replace the slicer settings
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSettings`] when a value is out of range.
    pub fn update_settings(mut self, settings: PrintSettings) -> Result<Self> {
        settings.validate()?;
        self.print_settings = settings;
        Ok(self)
    }

    /// Mark configured as of now
    pub fn finalize(self) -> Self {
        self.finalize_at(Utc::now())
    }

    /// Mark configured as of `at`
    ///
    /// Finalizing again only moves the timestamp.
    pub fn finalize_at(mut self, at: DateTime<Utc>) -> Self {
        self.configured_at = Some(at);
        self.is_configured = true;
        self
    }

    /// Drop overrides for meshes missing from a re-ingested scene
    ///
    /// Returns the configuration and the dropped mesh names, sorted.
    pub fn retain_known_meshes(mut self, known_meshes: &MeshNameSet) -> (Self, Vec<String>) {
        let dropped: Vec<String> = self
            .mesh_color_overrides
            .keys()
            .filter(|name| !known_meshes.contains(name))
            .cloned()
            .collect();
        for name in &dropped {
            self.mesh_color_overrides.remove(name);
        }
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "Dropped overrides for unknown meshes");
        }
        (self, dropped)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON and validate the settings
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] for malformed JSON, [`Error::InvalidSettings`]
    /// for out-of-range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.print_settings.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn known(names: &[&str]) -> MeshNameSet {
        names.iter().copied().collect()
    }

    fn config() -> PrintConfiguration {
        PrintConfiguration::create_default(&SceneGraph::new(crate::format::ModelFormat::Stl))
    }

    #[test]
    fn test_settings_serialize_with_contract_names() {
        let value = serde_json::to_value(PrintSettings::default()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "layerHeight": 0.2,
                "initialLayerHeight": 0.2,
                "materialType": "plastic",
                "wallLoops": 2,
                "infillPattern": "grid",
                "infillDensity": 15.0,
                "nozzleDiameter": 0.4,
                "supportEnabled": false,
                "supportType": "normal",
                "printPlate": "textured"
            })
        );
    }

    #[test]
    fn test_apply_mesh_color() {
        let names = known(&["Lid", "Base"]);
        let config = config()
            .apply_mesh_color(&names, "Lid", Color::rgb(255, 0, 0))
            .unwrap();
        assert_eq!(
            config.mesh_color_overrides.get("Lid"),
            Some(&Color::rgb(255, 0, 0))
        );
        // Last write wins
        let config = config
            .apply_mesh_color(&names, "Lid", Color::rgb(0, 0, 255))
            .unwrap();
        assert_eq!(config.mesh_color_overrides.len(), 1);
        assert_eq!(
            config.mesh_color_overrides.get("Lid"),
            Some(&Color::rgb(0, 0, 255))
        );
    }

    #[test]
    fn test_apply_unknown_mesh_rejected() {
        let err = config()
            .apply_mesh_color(&known(&["Lid"]), "Handle", Color::rgb(1, 2, 3))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMeshReference(ref n) if n == "Handle"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_clear_mesh_color() {
        let config = config()
            .apply_mesh_color(&known(&["Lid"]), "Lid", Color::rgb(1, 2, 3))
            .unwrap()
            .clear_mesh_color("Lid")
            .clear_mesh_color("Missing");
        assert!(config.mesh_color_overrides.is_empty());
    }

    #[test]
    fn test_update_settings_validation() {
        let good = PrintSettings {
            layer_height: 0.12,
            material_type: MaterialType::Resin,
            support_enabled: true,
            support_type: SupportType::Tree,
            ..PrintSettings::default()
        };
        let updated = config().update_settings(good.clone()).unwrap();
        assert_eq!(updated.print_settings, good);

        let bad = [
            PrintSettings {
                layer_height: 0.0,
                ..PrintSettings::default()
            },
            PrintSettings {
                nozzle_diameter: f64::NAN,
                ..PrintSettings::default()
            },
            PrintSettings {
                infill_density: 100.5,
                ..PrintSettings::default()
            },
            PrintSettings {
                wall_loops: 0,
                ..PrintSettings::default()
            },
            PrintSettings {
                infill_pattern: "  ".to_string(),
                ..PrintSettings::default()
            },
        ];
        for settings in bad {
            assert!(matches!(
                config().update_settings(settings),
                Err(Error::InvalidSettings(_))
            ));
        }
    }

    #[test]
    fn test_finalize_idempotent_except_timestamp() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap();
        let once = config().finalize_at(t1);
        let twice = once.clone().finalize_at(t2);

        assert!(once.is_configured && twice.is_configured);
        assert_eq!(once.configured_at, Some(t1));
        assert_eq!(twice.configured_at, Some(t2));
        assert_eq!(once.mesh_color_overrides, twice.mesh_color_overrides);
        assert_eq!(once.print_settings, twice.print_settings);
    }

    #[test]
    fn test_retain_known_meshes() {
        let names = known(&["Lid", "Base"]);
        let config = config()
            .apply_mesh_color(&names, "Lid", Color::rgb(1, 1, 1))
            .unwrap()
            .apply_mesh_color(&names, "Base", Color::rgb(2, 2, 2))
            .unwrap();

        let (config, dropped) = config.retain_known_meshes(&known(&["Base"]));

        assert_eq!(dropped, vec!["Lid".to_string()]);
        assert_eq!(config.mesh_color_overrides.len(), 1);
    }

    #[test]
    fn test_json_roundtrip() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let config = config()
            .apply_mesh_color(&known(&["Lid"]), "Lid", Color::rgba(255, 0, 0, 128))
            .unwrap()
            .finalize_at(at);

        let json = config.to_json().unwrap();
        assert!(json.contains("\"meshColorOverrides\":{\"Lid\":\"#FF000080\"}"));
        assert!(json.contains("\"isConfigured\":true"));

        let back = PrintConfiguration::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"{"printSettings": {"layerHeight": -1}}"#;
        assert!(matches!(
            PrintConfiguration::from_json(json),
            Err(Error::InvalidSettings(_))
        ));
        assert!(matches!(
            PrintConfiguration::from_json("{"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            PrintConfiguration::from_json(r#"{"printSettings": {"materialType": "wood"}}"#),
            Err(Error::Serialization(_))
        ));
    }
}
