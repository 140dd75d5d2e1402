//! Tera engine bound to one template source and one KV snapshot.
//!
//! # Data binding
//!
//! | snapshot key | template expression                      |
//! |--------------|------------------------------------------|
//! | `/foo`       | `{{ foo }}`                              |
//! | `/db/host`   | `{{ db.host }}` or `{{ getv(key="/db/host") }}` |
//! | `/hosts/*`   | `{% for h in getvs(pattern="/hosts/*") %}` |
//!
//! Autoescaping is disabled: rendered output is configuration, not HTML.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tera::{Context, Tera};

use crate::error::{describe, RenderError};
use crate::functions;
use crate::snapshot::KvSnapshot;

/// Name of the variable bound to the staged file path in check commands.
pub const STAGED_PATH_VAR: &str = "src";

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn template_name(source: &Path) -> String {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// A compiled template ready to execute against the snapshot it was built with.
pub struct TemplateEngine {
    tera: Tera,
    name: String,
    source: PathBuf,
    context: Context,
}

impl TemplateEngine {
    /// Read and compile `source`, binding `snapshot` as data and lookup scope.
    pub fn load(source: &Path, snapshot: &KvSnapshot) -> Result<Self, RenderError> {
        let contents = match std::fs::read_to_string(source) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RenderError::MissingTemplate {
                    path: source.to_path_buf(),
                })
            }
            Err(e) => return Err(io_err(source, e)),
        };

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        functions::register(&mut tera, Arc::new(snapshot.clone()));

        let name = template_name(source);
        tera.add_raw_template(&name, &contents)
            .map_err(|source_err| RenderError::Compile {
                path: source.to_path_buf(),
                detail: describe(&source_err),
                source: source_err,
            })?;

        let context = Context::from_serialize(snapshot.to_tree())?;

        Ok(TemplateEngine {
            tera,
            name,
            source: source.to_path_buf(),
            context,
        })
    }

    /// Execute the template.
    pub fn render(&self) -> Result<String, RenderError> {
        self.tera
            .render(&self.name, &self.context)
            .map_err(|err| RenderError::Execute {
                path: self.source.clone(),
                detail: describe(&err),
                source: err,
            })
    }
}

/// Compile and execute `source` against `snapshot` in one step.
pub fn render_template(source: &Path, snapshot: &KvSnapshot) -> Result<String, RenderError> {
    TemplateEngine::load(source, snapshot)?.render()
}

/// Expand a check command, binding `{{ src }}` to the staged file path.
pub fn render_command(command: &str, staged_path: &Path) -> Result<String, RenderError> {
    let mut context = Context::new();
    context.insert(STAGED_PATH_VAR, &staged_path.to_string_lossy());
    Tera::one_off(command, &context, false).map_err(|err| RenderError::Command {
        command: command.to_string(),
        detail: describe(&err),
        source: err,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use renderizr_core::{KeyPrefix, KvPair};
    use tempfile::TempDir;

    fn write_template(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).expect("write template");
        path
    }

    fn snapshot(items: &[(&str, &str)]) -> KvSnapshot {
        let mut s = KvSnapshot::new();
        s.replace(
            items.iter().map(|(k, v)| KvPair::new(*k, *v)),
            &KeyPrefix::root(),
        );
        s
    }

    #[test]
    fn renders_top_level_key() {
        let dir = TempDir::new().expect("tempdir");
        let tpl = write_template(&dir, "foo.tmpl", "{{ foo }}");
        let out = render_template(&tpl, &snapshot(&[("/foo", "bar")])).unwrap();
        assert_eq!(out, "bar");
    }

    #[test]
    fn output_is_not_html_escaped() {
        let dir = TempDir::new().expect("tempdir");
        let tpl = write_template(&dir, "raw.html", "{{ v }}");
        let out = render_template(&tpl, &snapshot(&[("/v", "<a & b>")])).unwrap();
        assert_eq!(out, "<a & b>");
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let err = render_template(&dir.path().join("absent.tmpl"), &KvSnapshot::new())
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingTemplate { .. }));
    }

    #[test]
    fn compile_error_names_the_source() {
        let dir = TempDir::new().expect("tempdir");
        let tpl = write_template(&dir, "broken.tmpl", "{% if %}");
        let err = render_template(&tpl, &KvSnapshot::new()).unwrap_err();
        assert!(matches!(err, RenderError::Compile { .. }));
        assert!(err.to_string().contains("broken.tmpl"));
    }

    #[test]
    fn undefined_variable_fails_execution() {
        let dir = TempDir::new().expect("tempdir");
        let tpl = write_template(&dir, "undef.tmpl", "{{ nope }}");
        let err = render_template(&tpl, &KvSnapshot::new()).unwrap_err();
        assert!(matches!(err, RenderError::Execute { .. }));
    }

    #[test]
    fn command_binds_staged_path() {
        let cmd = render_command("nginx -t -c {{ src }}", Path::new("/etc/.nginx.conf123"))
            .unwrap();
        assert_eq!(cmd, "nginx -t -c /etc/.nginx.conf123");
    }
}
