//! OBJ file loader for 3D models
//!
//! Parsing is done by `tobj`, which triangulates polygonal faces and resolves
//! the per-attribute indices into one index per corner. This module turns its
//! flat attribute arrays into [`Vertex`] values, fills in white for files
//! without vertex colors and merges identical vertices across all objects in
//! the file so each one is stored once.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::render::model::{MeshData, Vertex};

/// Errors from loading an OBJ file
#[derive(Error, Debug)]
pub enum ObjError {
    /// The file could not be opened or parsed
    #[error("Failed to load {}: {source}", path.display())]
    File {
        /// File that failed
        path: PathBuf,
        /// Underlying loader error
        #[source]
        source: tobj::LoadError,
    },
    /// In-memory OBJ data could not be parsed
    #[error("OBJ parse error: {0}")]
    Load(#[from] tobj::LoadError),
    /// The data parsed but does not describe a usable mesh
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

const DEFAULT_COLOR: [f32; 3] = [1.0, 1.0, 1.0];

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

#[derive(Default)]
struct MeshBuilder {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    unique: HashMap<[u32; 11], u32>,
}

impl MeshBuilder {
    fn push(&mut self, vertex: Vertex) -> Result<u32, ObjError> {
        if let Some(&index) = self.unique.get(&vertex.dedup_key()) {
            return Ok(index);
        }
        let index = u32::try_from(self.vertices.len())
            .map_err(|_| ObjError::InvalidFormat("Too many vertices".to_string()))?;
        self.unique.insert(vertex.dedup_key(), index);
        self.vertices.push(vertex);
        Ok(index)
    }

    fn add_mesh(&mut self, mesh: &tobj::Mesh) -> Result<(), ObjError> {
        for &index in &mesh.indices {
            let vertex = corner(mesh, index as usize)?;
            let index = self.push(vertex)?;
            self.indices.push(index);
        }
        Ok(())
    }

    fn finish(self) -> Result<MeshData, ObjError> {
        if self.vertices.is_empty() {
            return Err(ObjError::InvalidFormat("No faces found in OBJ data".to_string()));
        }
        Ok(MeshData::new(self.vertices, self.indices))
    }
}

fn triple(values: &[f32], index: usize) -> Option<[f32; 3]> {
    let start = index.checked_mul(3)?;
    values.get(start..start + 3).map(|v| [v[0], v[1], v[2]])
}

fn pair(values: &[f32], index: usize) -> Option<[f32; 2]> {
    let start = index.checked_mul(2)?;
    values.get(start..start + 2).map(|v| [v[0], v[1]])
}

/// Vertex `index` of a single-indexed mesh; missing normals and UVs stay zero
fn corner(mesh: &tobj::Mesh, index: usize) -> Result<Vertex, ObjError> {
    let position = triple(&mesh.positions, index).ok_or_else(|| {
        ObjError::InvalidFormat(format!("Vertex {index} has no position"))
    })?;

    Ok(Vertex {
        position,
        color: triple(&mesh.vertex_color, index).unwrap_or(DEFAULT_COLOR),
        normal: triple(&mesh.normals, index).unwrap_or_default(),
        uv: pair(&mesh.texcoords, index).unwrap_or_default(),
    })
}

fn build_mesh(models: &[tobj::Model]) -> Result<MeshData, ObjError> {
    let mut builder = MeshBuilder::default();
    for model in models {
        builder.add_mesh(&model.mesh)?;
    }
    builder.finish()
}

/// Wavefront OBJ reader
pub struct ObjLoader;

impl ObjLoader {
    /// Load an OBJ file; materials it references are ignored
    pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshData, ObjError> {
        let path = path.as_ref();
        let (models, _materials) =
            tobj::load_obj(path, &load_options()).map_err(|source| ObjError::File {
                path: path.to_path_buf(),
                source,
            })?;

        let mesh = build_mesh(&models)?;
        log::debug!(
            "Loaded {}: {} objects, {} unique vertices, {} indices",
            path.display(),
            models.len(),
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ text held in memory
    pub fn parse_str(source: &str) -> Result<MeshData, ObjError> {
        Self::parse(source.as_bytes())
    }

    /// Parse OBJ text from any reader; `mtllib` statements load no materials
    pub fn parse(mut reader: impl BufRead) -> Result<MeshData, ObjError> {
        let (models, _materials) =
            tobj::load_obj_buf(&mut reader, &load_options(), |_| Ok(Default::default()))?;
        build_mesh(&models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const QUAD: &str = "\
# unit quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
f 1//1 2//1 3//1 4//1
";

    #[test]
    fn test_quad_is_fan_triangulated() {
        let mesh = ObjLoader::parse_str(QUAD).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_relative_eq!(mesh.vertices[2].normal[2], 1.0);
        assert_eq!(mesh.vertices[0].color, DEFAULT_COLOR);
    }

    #[test]
    fn test_shared_corners_are_deduplicated() {
        let source = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3
f 1 3 4
";
        let mesh = ObjLoader::parse_str(source).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_distinct_normals_are_not_merged() {
        let source = "\
v 0 0 0
v 1 0 0
v 0 1 0
vn 0 0 1
vn 0 0 -1
f 1//1 2//1 3//1
f 1//2 3//2 2//2
";
        let mesh = ObjLoader::parse_str(source).unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn test_vertex_colors_and_uvs() {
        let source = "\
v 0 0 0 1 0 0
v 1 0 0 0 1 0
v 0 1 0 0 0 1
vt 0.25 0.75
f 1/1 2/1 3/1
";
        let mesh = ObjLoader::parse_str(source).unwrap();
        assert_eq!(mesh.vertices[1].color, [0.0, 1.0, 0.0]);
        assert_relative_eq!(mesh.vertices[0].uv[1], 0.75);
    }

    #[test]
    fn test_identical_corners_merge_across_objects() {
        let source = "\
o first
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
o second
f 1 2 3
";
        let mesh = ObjLoader::parse_str(source).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_negative_indices_are_relative() {
        let source = "\
v 0 0 0
v 1 0 0
v 0 1 0
f -3 -2 -1
";
        let mesh = ObjLoader::parse_str(source).unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n";
        assert!(ObjLoader::parse_str(source).is_err());
    }

    #[test]
    fn test_empty_file_is_rejected() {
        assert!(matches!(
            ObjLoader::parse_str("# nothing here\n"),
            Err(ObjError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let result = ObjLoader::load_obj("does/not/exist.obj");
        match result {
            Err(ObjError::File { path, .. }) => assert_eq!(path, Path::new("does/not/exist.obj")),
            other => panic!("expected a file error, got {:?}", other.map(|mesh| mesh.vertices.len())),
        }
    }
}
