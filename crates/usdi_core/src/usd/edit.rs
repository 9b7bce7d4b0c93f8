//! Reference editing on the root layer of a stage.

use thiserror::Error;

use super::layer::{ListPosition, Reference};
use super::path::{is_absolute, ABSOLUTE_ROOT};
use super::stage::Stage;

/// Errors that can occur while editing a stage.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EditError {
    #[error("No prim at {0}")]
    InvalidPrim(String),

    #[error("Edit target is read-only: {0}")]
    ReadOnlyLayer(String),

    #[error("Reference target must be an absolute prim path: {0}")]
    InvalidTargetPath(String),

    #[error("Reference names neither an asset nor a prim")]
    EmptyReference,
}

/// Result type for edit operations.
pub type EditResult<T> = Result<T, EditError>;

impl Stage {
    /// Add a reference arc to the prim at `prim_path`, authored in the root
    /// layer. An empty asset path makes an internal reference to a prim of
    /// this stage. The stage is recomposed afterwards.
    pub fn add_reference(&mut self, prim_path: &str, reference: Reference, position: ListPosition) -> EditResult<()> {
        self.check_edit(prim_path, &reference)?;
        log::debug!("Adding reference {} to {}", reference, prim_path);

        let layer = self.root_layer_mut();
        layer.ensure_prim_spec(prim_path).references.insert(reference, position);
        layer.dirty = true;
        self.recompose();
        Ok(())
    }

    /// Remove a reference arc from the prim at `prim_path`. Only an exactly
    /// equal reference is removed; when the root layer does not author it
    /// explicitly, a `delete` is recorded so weaker layers lose it too.
    pub fn remove_reference(&mut self, prim_path: &str, reference: &Reference) -> EditResult<()> {
        self.check_edit(prim_path, reference)?;
        log::debug!("Removing reference {} from {}", reference, prim_path);

        let layer = self.root_layer_mut();
        layer.ensure_prim_spec(prim_path).references.remove(reference);
        layer.dirty = true;
        self.recompose();
        Ok(())
    }

    fn check_edit(&self, prim_path: &str, reference: &Reference) -> EditResult<()> {
        if prim_path == ABSOLUTE_ROOT || self.prim_at_path(prim_path).is_none() {
            return Err(EditError::InvalidPrim(prim_path.to_string()));
        }
        let layer = self.root_layer();
        if layer.read_only {
            return Err(EditError::ReadOnlyLayer(layer.location.to_string()));
        }
        if reference.asset_path.is_empty() && reference.prim_path.is_empty() {
            return Err(EditError::EmptyReference);
        }
        if !reference.prim_path.is_empty() && !is_absolute(&reference.prim_path) {
            return Err(EditError::InvalidTargetPath(reference.prim_path.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::test_asset_path;
    use crate::usd::{parse_usda, AssetLocation, StageOptions};

    const SCENE: &str = r#"#usda 1.0
def Xform "World" {
    def Xform "Slot" {}
}
"#;

    fn stage_at(location: AssetLocation) -> Stage {
        let layer = parse_usda(SCENE, location).unwrap();
        Stage::from_root_layer(layer, StageOptions::default())
    }

    fn cube_path() -> String {
        test_asset_path("assets/ref_test/cube.usda").to_string_lossy().into_owned()
    }

    #[test]
    fn test_add_reference_composes() {
        let mut stage = stage_at(AssetLocation::Anonymous("edit".into()));
        stage
            .add_reference("/World/Slot", Reference::new(cube_path(), ""), ListPosition::FrontOfPrependList)
            .unwrap();

        let slot = stage.prim_at_path("/World/Slot").unwrap();
        assert_eq!(slot.direct_references().len(), 1);
        assert_eq!(stage.prim_at_path("/World/Slot/Mesh").unwrap().type_name(), "Mesh");
        assert!(stage.root_layer().dirty);

        let spec = stage.root_layer().prim_spec("/World/Slot").unwrap();
        assert_eq!(spec.references.prepended, vec![Reference::new(cube_path(), "")]);
    }

    #[test]
    fn test_add_reference_goes_to_front() {
        let mut stage = stage_at(AssetLocation::Anonymous("edit".into()));
        let first = Reference::new(cube_path(), "/Cube");
        let second = Reference::new(cube_path(), "");
        stage
            .add_reference("/World/Slot", first.clone(), ListPosition::FrontOfPrependList)
            .unwrap();
        stage
            .add_reference("/World/Slot", second.clone(), ListPosition::FrontOfPrependList)
            .unwrap();

        let spec = stage.root_layer().prim_spec("/World/Slot").unwrap();
        assert_eq!(spec.references.prepended, vec![second.clone(), first.clone()]);

        // re-adding moves the item rather than duplicating it
        stage
            .add_reference("/World/Slot", first.clone(), ListPosition::FrontOfPrependList)
            .unwrap();
        let spec = stage.root_layer().prim_spec("/World/Slot").unwrap();
        assert_eq!(spec.references.prepended, vec![first, second]);
    }

    #[test]
    fn test_remove_reference_records_delete() {
        let mut stage = stage_at(AssetLocation::Anonymous("edit".into()));
        let reference = Reference::new(cube_path(), "");
        stage
            .add_reference("/World/Slot", reference.clone(), ListPosition::FrontOfPrependList)
            .unwrap();
        stage.remove_reference("/World/Slot", &reference).unwrap();

        let spec = stage.root_layer().prim_spec("/World/Slot").unwrap();
        assert!(spec.references.prepended.is_empty());
        assert_eq!(spec.references.deleted, vec![reference]);
        assert!(stage.prim_at_path("/World/Slot/Mesh").is_none());
        assert!(stage.prim_at_path("/World/Slot").unwrap().direct_references().is_empty());
    }

    #[test]
    fn test_remove_requires_exact_match() {
        let mut stage = stage_at(AssetLocation::Anonymous("edit".into()));
        stage
            .add_reference("/World/Slot", Reference::new(cube_path(), "/Cube"), ListPosition::FrontOfPrependList)
            .unwrap();
        stage
            .remove_reference("/World/Slot", &Reference::new(cube_path(), ""))
            .unwrap();

        // a different target path is a different reference
        assert!(stage.prim_at_path("/World/Slot/Mesh").is_some());
    }

    #[test]
    fn test_remove_from_referenced_file() {
        let mut stage = Stage::open(test_asset_path("assets/ref_test/ref_test.usda")).unwrap();
        let authored = Reference::new("./cube.usda", "");
        stage.remove_reference("/World/CubeA", &authored).unwrap();

        assert!(stage.prim_at_path("/World/CubeA/Mesh").is_none());
        assert!(stage.prim_at_path("/World/CubeB/Mesh").is_some());
    }

    #[test]
    fn test_edit_rejections() {
        let mut stage = stage_at(AssetLocation::Anonymous("edit".into()));
        let reference = Reference::new(cube_path(), "");

        assert_eq!(
            stage.add_reference("/Missing", reference.clone(), ListPosition::FrontOfPrependList),
            Err(EditError::InvalidPrim("/Missing".into()))
        );
        assert!(matches!(
            stage.add_reference("/", reference.clone(), ListPosition::FrontOfPrependList),
            Err(EditError::InvalidPrim(_))
        ));
        assert!(matches!(
            stage.add_reference("/World", Reference::new(cube_path(), "Cube"), ListPosition::FrontOfPrependList),
            Err(EditError::InvalidTargetPath(_))
        ));
        assert_eq!(
            stage.remove_reference("/World", &Reference::default()),
            Err(EditError::EmptyReference)
        );
        assert!(!stage.root_layer().dirty);
    }

    #[test]
    fn test_internal_reference() {
        let layer = parse_usda(
            "#usda 1.0\ndef Xform \"World\" {\n    def Xform \"Slot\" {}\n}\ndef Cube \"Proto\" {\n    double size = 4\n}\n",
            AssetLocation::Anonymous("internal".into()),
        )
        .unwrap();
        let mut stage = Stage::from_root_layer(layer, StageOptions::default());

        let reference = Reference::new("", "/Proto");
        stage
            .add_reference("/World/Slot", reference.clone(), ListPosition::FrontOfPrependList)
            .unwrap();

        let slot = stage.prim_at_path("/World/Slot").unwrap();
        assert_eq!(slot.type_name(), "Cube");
        assert_eq!(slot.direct_references(), &[reference.clone()][..]);
        assert!(stage.root_layer().export_to_string().contains("prepend references = </Proto>"));

        stage.remove_reference("/World/Slot", &reference).unwrap();
        assert_eq!(stage.prim_at_path("/World/Slot").unwrap().type_name(), "Xform");
    }

    #[test]
    fn test_packaged_layer_is_read_only() {
        let mut stage = stage_at(AssetLocation::Packaged {
            archive: PathBuf::from("scene.usdz"),
            entry: "scene.usda".into(),
        });
        let result = stage.add_reference("/World", Reference::new(cube_path(), ""), ListPosition::FrontOfPrependList);
        assert!(matches!(result, Err(EditError::ReadOnlyLayer(_))));
    }
}
