//! Foundation module - math aliases and logging bootstrap

pub mod logging;
pub mod math;
