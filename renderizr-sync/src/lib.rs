//! # renderizr-sync
//!
//! Stages rendered templates next to their destination, compares them by
//! owner, mode and content digest, validates them with an optional check
//! command, swaps them into place atomically and runs reload hooks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use renderizr_core::{KvPair, TemplateSpec};
//! use renderizr_sync::{RenderOutcome, TemplateRenderer};
//!
//! fn sync() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = TemplateSpec::new("/etc/renderizr/app.conf.tmpl", "/etc/app.conf")?
//!         .with_reload_command("systemctl reload app");
//!     let renderer = TemplateRenderer::new(spec, false);
//!     match renderer.render(vec![KvPair::new("/port", "8080")])? {
//!         RenderOutcome::Written { path } => println!("updated {}", path.display()),
//!         other => println!("{other:?}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod stage;
pub mod template;

pub use descriptor::FileDescriptor;
pub use error::SyncError;
pub use template::{RenderOutcome, TemplateRenderer};
