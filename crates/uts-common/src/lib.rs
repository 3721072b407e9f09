//! ---
//! uts_section: "01-core-functionality"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Shared primitives and utilities for the simulator runtime."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
pub mod config;
pub mod logging;
