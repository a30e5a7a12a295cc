use crate::error::{Error, ExtractError, FailureKind};
use crate::extraction::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write a release payload: one package, one expansion file, one ignored file
fn write_payload(dir: &Path) {
    std::fs::create_dir_all(dir.join("data")).unwrap();
    std::fs::write(dir.join("game.apk"), b"APK-CONTENT").unwrap();
    std::fs::write(dir.join("data").join("main.3.com.example.game.obb"), vec![7u8; 4096])
        .unwrap();
    std::fs::write(dir.join("readme.txt"), b"ignore me").unwrap();
}

/// Create a valid 7z archive from a source directory using sevenz_rust
fn create_7z_archive(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).unwrap();
}

fn create_encrypted_7z_archive(archive_path: &Path, source_dir: &Path, password: &str) {
    sevenz_rust::compress_to_path_encrypted(
        source_dir,
        archive_path,
        sevenz_rust::Password::from(password),
    )
    .unwrap();
}

fn file_names(files: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ---------------------------------------------------------------------------
// Password list
// ---------------------------------------------------------------------------

#[test]
fn test_password_list_configured_then_empty() {
    let passwords = PasswordList::collect(Some("secret"), true);
    let collected: Vec<&String> = passwords.iter().collect();
    assert_eq!(collected, vec!["secret", ""]);
}

#[test]
fn test_password_list_without_fallback() {
    let passwords = PasswordList::collect(Some("secret"), false);
    assert_eq!(passwords.len(), 1);

    let none = PasswordList::collect(None, false);
    assert!(none.is_empty());
}

#[test]
fn test_password_list_empty_configured_not_duplicated() {
    let passwords = PasswordList::collect(Some(""), true);
    assert_eq!(passwords.len(), 1);
}

// ---------------------------------------------------------------------------
// Entry selection and progress
// ---------------------------------------------------------------------------

#[test]
fn test_installable_entry_names() {
    assert!(is_installable_entry("game.apk"));
    assert!(is_installable_entry("Game/MAIN.1.COM.X.OBB"));
    assert!(is_installable_entry("dir\\patch.2.com.x.obb"));
    assert!(!is_installable_entry("readme.txt"));
    assert!(!is_installable_entry("nested.7z"));
    assert!(!is_installable_entry("apk/"));
}

#[test]
fn test_stage_progress_fraction() {
    let progress = StageProgress::new();
    assert_eq!(progress.fraction(), 0.0);

    progress.set_total(200);
    progress.add(50);
    assert!((progress.fraction() - 0.25).abs() < f32::EPSILON);

    progress.add(500);
    assert_eq!(progress.fraction(), 1.0);

    progress.reset();
    assert_eq!(progress.fraction(), 0.0);
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

#[test]
fn test_plan_orders_parts_numerically() {
    let dir = PathBuf::from("/dl");
    let files = vec![
        dir.join("game.7z.10"),
        dir.join("game.7z.2"),
        dir.join("game.7z.20"),
        dir.join("game.7z.1"),
        dir.join("main.1.com.x.obb"),
    ];

    let plans = plan_archives(&files);

    assert_eq!(
        plans,
        vec![ArchiveSource::Split {
            container: dir.join("game.7z"),
            parts: vec![
                dir.join("game.7z.1"),
                dir.join("game.7z.2"),
                dir.join("game.7z.10"),
                dir.join("game.7z.20"),
            ],
        }]
    );
}

#[test]
fn test_plan_single_archive_used_in_place() {
    let path = PathBuf::from("/dl/game.7z");
    let plans = plan_archives(std::slice::from_ref(&path));
    assert_eq!(plans, vec![ArchiveSource::Single(path.clone())]);
    assert_eq!(plans[0].container(), path.as_path());
}

#[tokio::test]
async fn test_assemble_concatenates_in_numeric_order_and_removes_parts() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    for (suffix, byte) in [("1", b'a'), ("2", b'b'), ("10", b'c'), ("20", b'd')] {
        std::fs::write(dir.join(format!("game.7z.{}", suffix)), vec![byte; 3]).unwrap();
    }
    let files: Vec<PathBuf> = ["1", "2", "10", "20"]
        .iter()
        .map(|s| dir.join(format!("game.7z.{}", s)))
        .collect();
    let plan = plan_archives(&files).remove(0);
    let progress = StageProgress::new();

    let container = assemble(&plan, false, &progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(container, dir.join("game.7z"));
    assert_eq!(std::fs::read(&container).unwrap(), b"aaabbbcccddd");
    assert!(files.iter().all(|p| !p.exists()));
    assert_eq!(progress.fraction(), 1.0);
}

#[tokio::test]
async fn test_assemble_retains_parts_when_requested() {
    let temp = TempDir::new().unwrap();
    let parts: Vec<PathBuf> = (1..=2)
        .map(|i| {
            let p = temp.path().join(format!("x.7z.00{}", i));
            std::fs::write(&p, b"xy").unwrap();
            p
        })
        .collect();
    let plan = plan_archives(&parts).remove(0);

    assemble(&plan, true, &StageProgress::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(parts.iter().all(|p| p.exists()));
    assert_eq!(std::fs::read(temp.path().join("x.7z")).unwrap(), b"xyxy");
}

#[tokio::test]
async fn test_assemble_missing_part() {
    let temp = TempDir::new().unwrap();
    let present = temp.path().join("x.7z.001");
    std::fs::write(&present, b"1").unwrap();
    let plan = ArchiveSource::Split {
        container: temp.path().join("x.7z"),
        parts: vec![present, temp.path().join("x.7z.002")],
    };

    let err = assemble(&plan, false, &StageProgress::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Extract(ExtractError::MissingPart { .. })
    ));
}

#[tokio::test]
async fn test_assemble_observes_cancellation() {
    let temp = TempDir::new().unwrap();
    let part = temp.path().join("x.7z.001");
    std::fs::write(&part, b"data").unwrap();
    let plan = plan_archives(std::slice::from_ref(&part)).remove(0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assemble(&plan, false, &StageProgress::new(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(part.exists(), "parts are kept when merge is interrupted");
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_extract_keeps_only_installable_entries() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    write_payload(&source);
    let archive = temp.path().join("game.7z");
    create_7z_archive(&archive, &source);
    let dest = temp.path().join("out");
    let progress = Arc::new(StageProgress::new());

    let files = extract_archive(
        &archive,
        &dest,
        &PasswordList::collect(None, true),
        progress.clone(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        file_names(&files),
        vec!["game.apk", "main.3.com.example.game.obb"]
    );
    assert!(files.iter().all(|f| f.starts_with(&dest)));
    let on_disk = file_names(&collect_files(&dest).unwrap());
    assert!(!on_disk.contains(&"readme.txt".to_string()));
    assert_eq!(progress.fraction(), 1.0);
}

#[tokio::test]
async fn test_extract_encrypted_with_configured_password() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    write_payload(&source);
    let archive = temp.path().join("locked.7z");
    create_encrypted_7z_archive(&archive, &source, "hunter2");
    let dest = temp.path().join("out");

    let files = extract_archive(
        &archive,
        &dest,
        &PasswordList::collect(Some("hunter2"), true),
        Arc::new(StageProgress::new()),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(files.len(), 2);
    let apk = files.iter().find(|f| f.extension().unwrap() == "apk").unwrap();
    assert_eq!(std::fs::read(apk).unwrap(), b"APK-CONTENT");
}

#[tokio::test]
async fn test_extract_encrypted_with_wrong_password_fails_permanently() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    write_payload(&source);
    let archive = temp.path().join("locked.7z");
    create_encrypted_7z_archive(&archive, &source, "hunter2");

    let err = extract_archive(
        &archive,
        &temp.path().join("out"),
        &PasswordList::collect(Some("wrong"), false),
        Arc::new(StageProgress::new()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Extract(_)));
    assert_eq!(err.kind(), FailureKind::NonRetryable);
}

#[tokio::test]
async fn test_wrong_passwords_leave_earlier_artifacts_in_place() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    write_payload(&source);
    let archive = temp.path().join("second.7z");
    create_encrypted_7z_archive(&archive, &source, "hunter2");

    // Output of a container extracted earlier into the same directory
    let dest = temp.path().join("out");
    std::fs::create_dir_all(&dest).unwrap();
    let earlier = dest.join("patch.1.com.example.game.obb");
    std::fs::write(&earlier, vec![1u8; 512]).unwrap();

    let err = extract_archive(
        &archive,
        &dest,
        &PasswordList::collect(Some("wrong"), true),
        Arc::new(StageProgress::new()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Extract(ExtractError::WrongPassword { .. })));
    assert_eq!(std::fs::read(&earlier).unwrap(), vec![1u8; 512]);
    assert_eq!(
        file_names(&collect_files(&dest).unwrap()),
        vec!["patch.1.com.example.game.obb".to_string()]
    );
}

#[tokio::test]
async fn test_extract_archive_without_installables() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("notes.txt"), b"nothing").unwrap();
    let archive = temp.path().join("docs.7z");
    create_7z_archive(&archive, &source);

    let err = extract_archive(
        &archive,
        &temp.path().join("out"),
        &PasswordList::collect(None, true),
        Arc::new(StageProgress::new()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Extract(ExtractError::NoInstallableEntries { .. })
    ));
}

#[tokio::test]
async fn test_extract_rejects_unknown_type() {
    let temp = TempDir::new().unwrap();
    let bogus = temp.path().join("game.zip");
    std::fs::write(&bogus, b"PK").unwrap();

    let err = extract_archive(
        &bogus,
        &temp.path().join("out"),
        &PasswordList::collect(None, true),
        Arc::new(StageProgress::new()),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Extract(ExtractError::ExtractionFailed { .. })
    ));
}

#[tokio::test]
async fn test_extract_cancelled_before_start() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("src");
    write_payload(&source);
    let archive = temp.path().join("game.7z");
    create_7z_archive(&archive, &source);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = extract_archive(
        &archive,
        &temp.path().join("out"),
        &PasswordList::collect(None, true),
        Arc::new(StageProgress::new()),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(err.is_cancelled());
}

// ---------------------------------------------------------------------------
// Uncompressed releases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stage_uncompressed_moves_artifacts() {
    let temp = TempDir::new().unwrap();
    let downloads = temp.path().join("dl");
    std::fs::create_dir_all(downloads.join("obb")).unwrap();
    std::fs::write(downloads.join("game.apk"), b"apk").unwrap();
    std::fs::write(downloads.join("obb").join("main.1.com.g.obb"), b"obb").unwrap();
    let dest = temp.path().join("ex");

    let moved = stage_uncompressed(
        &downloads,
        &["game.apk".to_string(), "obb/main.1.com.g.obb".to_string()],
        &dest,
    )
    .await
    .unwrap();

    assert_eq!(moved, vec![dest.join("game.apk"), dest.join("obb").join("main.1.com.g.obb")]);
    assert!(!downloads.join("game.apk").exists());
    assert_eq!(std::fs::read(dest.join("game.apk")).unwrap(), b"apk");
}
