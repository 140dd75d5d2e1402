//! # renderizr-renderer
//!
//! Tera-based template engine that renders configuration files from a KV
//! snapshot.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use renderizr_core::{KeyPrefix, KvPair};
//! use renderizr_renderer::{render_template, KvSnapshot};
//!
//! let mut snapshot = KvSnapshot::new();
//! snapshot.replace(vec![KvPair::new("/app/port", "8080")], &KeyPrefix::new("/app"));
//! if let Ok(out) = render_template(Path::new("/etc/renderizr/app.conf.tmpl"), &snapshot) {
//!     println!("{out}");
//! }
//! ```

pub mod engine;
pub mod error;
pub mod functions;
pub mod snapshot;

pub use engine::{render_command, render_template, TemplateEngine, STAGED_PATH_VAR};
pub use error::RenderError;
pub use snapshot::KvSnapshot;
