//! Core engine settings shared by the renderer and the application driver

pub mod config;
