//! Asset loading
//!
//! Only Wavefront OBJ meshes are supported.

pub mod obj_loader;

pub use obj_loader::{ObjError, ObjLoader};
