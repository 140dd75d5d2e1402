//! End-to-end render cycles against a temporary directory.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use filetime::FileTime;
use renderizr_core::{FileMode, KeyPrefix, KvPair, TemplateSpec};
use renderizr_sync::{RenderOutcome, SyncError, TemplateRenderer};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, body).expect("write");
}

fn staged_siblings(dest: &Path) -> Vec<PathBuf> {
    let prefix = format!(".{}", dest.file_name().unwrap().to_string_lossy());
    fs::read_dir(dest.parent().unwrap())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(&prefix))
                .collect()
        })
        .unwrap_or_default()
}

fn kv(items: &[(&str, &str)]) -> Vec<KvPair> {
    items.iter().map(|(k, v)| KvPair::new(*k, *v)).collect()
}

struct Setup {
    _tmp: TempDir,
    src: PathBuf,
    dest: PathBuf,
}

fn setup(template: &str) -> Setup {
    let tmp = TempDir::new().expect("tempdir");
    let src = tmp.path().join("templates").join("app.conf.tmpl");
    let dest = tmp.path().join("etc").join("app.conf");
    write(&src, template);
    Setup {
        _tmp: tmp,
        src,
        dest,
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn first_render_creates_destination_with_default_mode() {
    let s = setup("{{ foo }}");
    let renderer = TemplateRenderer::new(TemplateSpec::new(&s.src, &s.dest).unwrap(), false);

    let outcome = renderer.render(kv(&[("/foo", "bar")])).unwrap();

    assert_eq!(outcome, RenderOutcome::Written { path: s.dest.clone() });
    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "bar");
    assert_eq!(fs::metadata(&s.dest).unwrap().mode() & 0o7777, 0o644);
    assert!(staged_siblings(&s.dest).is_empty());
}

#[test]
fn rendering_same_data_twice_does_not_touch_destination() {
    let s = setup("port={{ port }}\n");
    let renderer = TemplateRenderer::new(TemplateSpec::new(&s.src, &s.dest).unwrap(), false);
    renderer.render(kv(&[("/port", "80")])).unwrap();

    let old = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&s.dest, old).unwrap();

    let outcome = renderer.render(kv(&[("/port", "80")])).unwrap();

    assert!(matches!(outcome, RenderOutcome::Unchanged { .. }));
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&s.dest).unwrap());
    assert_eq!(mtime, old, "unchanged render must not rewrite the file");
    assert!(staged_siblings(&s.dest).is_empty());
}

#[test]
fn existing_mode_is_inherited_when_unset() {
    let s = setup("{{ foo }}");
    write(&s.dest, "old");
    fs::set_permissions(&s.dest, fs::Permissions::from_mode(0o640)).unwrap();
    let renderer = TemplateRenderer::new(TemplateSpec::new(&s.src, &s.dest).unwrap(), false);

    renderer.render(kv(&[("/foo", "new")])).unwrap();

    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "new");
    assert_eq!(fs::metadata(&s.dest).unwrap().mode() & 0o7777, 0o640);
}

#[test]
fn mode_change_alone_triggers_a_write() {
    let s = setup("same");
    write(&s.dest, "same");
    fs::set_permissions(&s.dest, fs::Permissions::from_mode(0o644)).unwrap();
    let spec = TemplateSpec::new(&s.src, &s.dest).unwrap().with_mode(FileMode(0o600));
    let renderer = TemplateRenderer::new(spec, false);

    let outcome = renderer.render(Vec::new()).unwrap();

    assert!(matches!(outcome, RenderOutcome::Written { .. }));
    assert_eq!(fs::metadata(&s.dest).unwrap().mode() & 0o7777, 0o600);
}

#[test]
fn prefix_is_stripped_before_rendering() {
    let s = setup("{{ db.host }}:{{ db.port }}");
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_key_prefix(KeyPrefix::new("/production/app"));
    let renderer = TemplateRenderer::new(spec, false);

    renderer
        .render(kv(&[
            ("/production/app/db/host", "10.0.0.5"),
            ("/production/app/db/port", "5432"),
        ]))
        .unwrap();

    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "10.0.0.5:5432");
}

#[test]
fn failed_check_leaves_destination_untouched() {
    let s = setup("{{ foo }}");
    write(&s.dest, "good");
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_check_command("grep -q good {{ src }}");
    let renderer = TemplateRenderer::new(spec, false);

    let err = renderer.render(kv(&[("/foo", "bad")])).unwrap_err();

    match err {
        SyncError::CheckFailed { command, .. } => {
            assert!(command.starts_with("grep -q good "));
            assert!(!command.contains("{{"), "check command must be expanded");
        }
        other => panic!("expected CheckFailed, got {other:?}"),
    }
    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "good");
    assert!(staged_siblings(&s.dest).is_empty());
}

#[test]
fn passing_check_sees_the_staged_content() {
    let s = setup("{{ foo }}");
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_check_command("grep -q ok {{ src }}");
    let renderer = TemplateRenderer::new(spec, false);

    let outcome = renderer.render(kv(&[("/foo", "ok")])).unwrap();

    assert!(matches!(outcome, RenderOutcome::Written { .. }));
}

#[test]
fn compile_error_leaves_destination_untouched() {
    let s = setup("{% for %}");
    write(&s.dest, "keep me");
    let renderer = TemplateRenderer::new(TemplateSpec::new(&s.src, &s.dest).unwrap(), false);

    let err = renderer.render(Vec::new()).unwrap_err();

    assert!(matches!(err, SyncError::Template(_)));
    assert!(err.to_string().contains("app.conf.tmpl"), "got: {err}");
    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "keep me");
    assert!(staged_siblings(&s.dest).is_empty());
}

#[test]
fn stage_failure_leaves_destination_untouched() {
    let s = setup("{{ foo }}");
    write(&s.dest, "original");
    // Chown to an owner the test cannot assume.
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_owner(renderizr_core::Owner {
            uid: u32::MAX - 1,
            gid: u32::MAX - 1,
        });
    let renderer = TemplateRenderer::new(spec, false);

    match renderer.render(kv(&[("/foo", "x")])) {
        Err(SyncError::Stage { .. }) => {}
        // Running as a privileged user lets the chown succeed.
        Ok(_) => return,
        Err(other) => panic!("expected Stage error, got {other:?}"),
    }
    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "original");
    assert!(staged_siblings(&s.dest).is_empty());
}

#[test]
fn noop_reports_would_write_without_changing_anything() {
    let s = setup("{{ foo }}");
    write(&s.dest, "before");
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_reload_command("exit 1");
    let renderer = TemplateRenderer::new(spec, true);

    let outcome = renderer.render(kv(&[("/foo", "after")])).unwrap();

    assert_eq!(outcome, RenderOutcome::WouldWrite { path: s.dest.clone() });
    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "before");
    assert!(staged_siblings(&s.dest).is_empty());
}

#[test]
fn reload_failure_is_reported_but_update_is_kept() {
    let s = setup("{{ foo }}");
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_reload_command("echo reload broke; exit 7");
    let renderer = TemplateRenderer::new(spec, false);

    let err = renderer.render(kv(&[("/foo", "v2")])).unwrap_err();

    match err {
        SyncError::ReloadFailed { output, .. } => assert!(output.contains("reload broke")),
        other => panic!("expected ReloadFailed, got {other:?}"),
    }
    assert_eq!(fs::read_to_string(&s.dest).unwrap(), "v2");
}

#[test]
fn reload_runs_after_replacement() {
    let s = setup("{{ foo }}");
    let marker = s.dest.with_file_name("reloaded");
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_reload_command(format!("cp {} {}", s.dest.display(), marker.display()));
    let renderer = TemplateRenderer::new(spec, false);

    renderer.render(kv(&[("/foo", "fresh")])).unwrap();

    assert_eq!(fs::read_to_string(&marker).unwrap(), "fresh");
}

#[test]
fn retained_staged_file_survives_unchanged_render() {
    let s = setup("{{ foo }}");
    let spec = TemplateSpec::new(&s.src, &s.dest).unwrap().keep_staged_file(true);
    let renderer = TemplateRenderer::new(spec, false);
    renderer.render(kv(&[("/foo", "a")])).unwrap();
    assert!(staged_siblings(&s.dest).is_empty(), "renamed file is the destination");

    renderer.render(kv(&[("/foo", "a")])).unwrap();

    let kept = staged_siblings(&s.dest);
    assert_eq!(kept.len(), 1);
    assert_eq!(fs::read_to_string(&kept[0]).unwrap(), "a");
}

#[test]
fn concurrent_renders_of_one_renderer_never_overlap() {
    let s = setup("{{ v }}");
    let lock_dir = s.dest.with_file_name("render.lock");
    // mkdir fails if another check is still running.
    let check = format!(
        "mkdir {lock} && sleep 0.05 && rmdir {lock}",
        lock = lock_dir.display()
    );
    let spec = TemplateSpec::new(&s.src, &s.dest)
        .unwrap()
        .with_check_command(check);
    let renderer = Arc::new(TemplateRenderer::new(spec, false));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let renderer = Arc::clone(&renderer);
            thread::spawn(move || {
                for i in 0..3 {
                    let value = format!("{t}-{i}");
                    renderer
                        .render(vec![KvPair::new("/v", value)])
                        .expect("render must not overlap another");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread");
    }
    assert!(!lock_dir.exists());
}
