//! Integration tests for thumbnail-sandbox
//!
//! Tests that need bubblewrap and ImageMagick are marked with #[ignore] and
//! can be run with:
//!   cargo test -- --ignored

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use thumbnail_sandbox::{Engine, EngineConfig, SandboxPolicy, ThumbnailError};

static INTEGRATION_TEST_LOCK: Mutex<()> = Mutex::new(());

fn unsandboxed() -> Engine {
    Engine::new(EngineConfig::new().sandbox(SandboxPolicy::Never))
}

fn sandboxed() -> Engine {
    Engine::new(EngineConfig::new().sandbox(SandboxPolicy::Always))
}

/// Write a 640x480 PNG and return its path
fn sample_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(640, 480, image::Rgb([200, 30, 30]))
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

fn file_uri(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}

/// Temp entries created by the engine
fn leftovers() -> Vec<PathBuf> {
    fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("thumbnail-sandbox-"))
                .unwrap_or(false)
        })
        .collect()
}

/// Test that a thumbnailer's output bytes are returned
#[test]
fn test_unsandboxed_copy_thumbnailer() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let input = sample_png(dir.path(), "in.png");

    let bytes = unsandboxed()
        .execute(r#"sh -c 'cp "$0" "$1"' %i %o"#, 256, &file_uri(&input))
        .unwrap();
    assert_eq!(bytes, fs::read(&input).unwrap());
}

/// Test that a nonexistent executable is a spawn error
#[test]
fn test_nonexistent_executable() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let err = unsandboxed()
        .execute("no-such-thumbnailer-binary %i %o", 128, "/tmp/in.png")
        .unwrap_err();
    assert!(matches!(err, ThumbnailError::Spawn { .. }));
}

/// Test that a failing thumbnailer reports its stderr
#[test]
fn test_failing_thumbnailer_reports_stderr() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let err = unsandboxed()
        .execute(
            "sh -c 'echo \"unsupported format\" >&2; exit 1' %i %o",
            128,
            "/tmp/in.png",
        )
        .unwrap_err();

    match err {
        ThumbnailError::ThumbnailerFailed { status, stderr, .. } => {
            assert_eq!(status, "exit status 1");
            assert!(stderr.contains("unsupported format"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Test that templates without placeholders are rejected before running
#[test]
fn test_missing_placeholders() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let engine = unsandboxed();
    assert!(matches!(
        engine.execute("touch %o", 128, "/tmp/in.png"),
        Err(ThumbnailError::MissingInputPlaceholder)
    ));
    assert!(matches!(
        engine.execute("cat %i", 128, "/tmp/in.png"),
        Err(ThumbnailError::MissingOutputPlaceholder)
    ));
}

/// Test that no temp files survive success or failure
#[test]
fn test_no_temp_files_leak() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let before = leftovers();
    let engine = unsandboxed();

    let _ = engine.execute(r#"sh -c 'echo x > "$1"' %i %o"#, 64, "/tmp/in.png");
    let _ = engine.execute("sh -c 'exit 2' %i %o", 64, "/tmp/in.png");
    let _ = engine.execute("true %i %o", 64, "/tmp/in.png");

    let after = leftovers();
    assert!(
        after.iter().all(|p| before.contains(p)),
        "leaked: {:?}",
        after
    );
}

/// Test the optional timeout
#[test]
fn test_timeout_kills_hung_thumbnailer() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let engine = Engine::new(
        EngineConfig::new()
            .sandbox(SandboxPolicy::Never)
            .timeout(Duration::from_millis(300)),
    );
    let err = engine
        .execute("sh -c 'sleep 30' %i %o", 64, "/tmp/in.png")
        .unwrap_err();
    assert!(matches!(err, ThumbnailError::Timeout { .. }));
}

/// Test that the sandbox requirement never silently degrades
#[test]
fn test_required_sandbox_with_missing_launcher() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let engine = Engine::new(
        EngineConfig::new()
            .sandbox(SandboxPolicy::Always)
            .bwrap("no-such-bwrap-launcher"),
    );
    let err = engine.execute("true %i %o", 64, "/tmp/in.png").unwrap_err();
    assert!(matches!(err, ThumbnailError::SandboxSetup(_)));
}

/// Test a real thumbnailer end to end (requires bwrap and ImageMagick)
#[test]
#[ignore]
fn test_sandboxed_convert() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let input = sample_png(dir.path(), "photo.png");
    let before = leftovers();

    let bytes = sandboxed()
        .execute("convert %i -thumbnail %sx%s png:%o", 256, &file_uri(&input))
        .unwrap();

    let thumb = image::load_from_memory(&bytes).unwrap();
    assert!(thumb.width() <= 256);
    assert!(thumb.height() <= 256);
    assert!(thumb.width() > 0);

    let after = leftovers();
    assert!(after.iter().all(|p| before.contains(p)));
}

/// Test the synthetic input path keeps the extension (requires bwrap)
#[test]
#[ignore]
fn test_sandboxed_input_alias() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.jpg");
    fs::write(&input, b"not really a jpeg").unwrap();

    let bytes = sandboxed()
        .execute(
            r#"sh -c '[ "$0" = /tmp/thumbnail-input.jpg ] && cp "$0" "$1"' %i %o"#,
            128,
            &file_uri(&input),
        )
        .unwrap();
    assert_eq!(bytes, b"not really a jpeg");
}

/// Test that the host filesystem is not visible (requires bwrap)
#[test]
#[ignore]
fn test_sandboxed_home_is_hidden() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let input = sample_png(dir.path(), "in.png");
    let secret = dir.path().join("secret.txt");
    fs::write(&secret, b"secret").unwrap();

    let template = format!(
        "sh -c '[ ! -e {} ] && cp \"$0\" \"$1\"' %i %o",
        secret.display()
    );
    assert!(sandboxed()
        .execute(&template, 128, &file_uri(&input))
        .is_ok());
}

/// Test failures inside the sandbox carry stderr (requires bwrap)
#[test]
#[ignore]
fn test_sandboxed_failure_reports_stderr() {
    let _lock = INTEGRATION_TEST_LOCK.lock();
    let dir = tempfile::tempdir().unwrap();
    let input = sample_png(dir.path(), "in.png");

    let err = sandboxed()
        .execute(
            "sh -c 'echo \"no decoder\" >&2; exit 1' %i %o",
            128,
            &file_uri(&input),
        )
        .unwrap_err();
    assert!(err.to_string().contains("no decoder"));
}
