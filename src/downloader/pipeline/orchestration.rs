//! Install task orchestration — top-level lifecycle for a single release.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, Error, Result};
use crate::extraction::{self, ArchiveSource, PasswordList, StageProgress};
use crate::install;
use crate::mirror::{ArtifactKind, Segment};
use crate::recovery::{self, ExtractionMarker, RecoveryPoint};
use crate::space_guard;
use crate::types::{InstallTask, Status};

use super::super::Sideloader;
use super::context::TaskContext;
use super::progress::{ProgressReporterParams, ProgressSource, spawn_progress_reporter};
use super::{
    DOWNLOAD_PHASE_END, EXTRACT_PHASE_END, MERGE_PHASE_END, OBB_PHASE_END, STAGE_PHASE_END,
};

/// Core install task -- drives one release through every phase.
///
/// Phases:
/// 1. Reconcile stored byte counts and consult the extraction marker
/// 2. List segments, check free space, download with range resume
/// 3. Merge split archives and extract the installable entries
/// 4. Write the extraction marker (download-only tasks stop here)
/// 5. Place expansion files, stage and verify the package, invoke the installer
///
/// The caller records the final status from the returned result.
pub(crate) async fn run_install_task(
    sideloader: &Sideloader,
    task: InstallTask,
    cancel: CancellationToken,
) -> Result<()> {
    let id = task.release_id.clone();
    let entry = sideloader.catalog.lookup(&id).ok_or_else(|| {
        Error::Download(DownloadError::ReleaseNotInCatalog {
            release: id.to_string(),
        })
    })?;

    let config = &sideloader.config;
    let task = match recovery::reconcile_downloaded_bytes(
        &sideloader.db,
        &task,
        &config.download.download_dir,
        &config.download.extract_dir,
    )
    .await?
    {
        Some(_) => sideloader.db.get_task(&id).await?.unwrap_or(task),
        None => task,
    };

    let ctx = TaskContext::new(sideloader, task, entry, cancel);

    match recovery::inspect(&config.download.extract_dir, &id).await? {
        RecoveryPoint::Extracted(marker) => {
            tracing::info!(
                release = %id,
                files = marker.files.len(),
                "Extraction already complete, skipping download"
            );
            ctx.progress.report(EXTRACT_PHASE_END, None, None).await;
        }
        RecoveryPoint::FromStart => {
            let segments = download_phase(&ctx).await?;
            extraction_phase(&ctx, &segments).await?;
        }
    }

    if ctx.task.download_only {
        recovery::remove_marker(&config.download.extract_dir, &id).await?;
        ctx.progress.report(1.0, None, None).await;
        tracing::info!(
            release = %id,
            artifacts = ?ctx.extract_dir,
            "Download-only task finished"
        );
        return Ok(());
    }

    install_phase(&ctx).await
}

/// List, size-check and download every segment of the release
async fn download_phase(ctx: &TaskContext) -> Result<Vec<Segment>> {
    ctx.check_cancelled()?;
    let sideloader = &ctx.sideloader;
    let config = &sideloader.config;

    let segments = sideloader
        .transfer
        .mirror
        .list_segments(&ctx.entry.release_name, &ctx.cancel)
        .await?;

    if let Some(estimate) = space_guard::check(
        &segments,
        ctx.retained(),
        &config.disk_space,
        &config.download.download_dir,
    )? {
        tracing::info!(
            release = %ctx.id,
            required = estimate.required,
            multiplier = estimate.multiplier,
            "Disk space check passed"
        );
    }

    tokio::fs::create_dir_all(&ctx.download_dir).await?;

    let mut paths = Vec::with_capacity(segments.len());
    let mut on_disk = 0u64;
    for segment in &segments {
        let path = ctx.segment_path(segment)?;
        on_disk += crate::utils::file_len(&path).await?;
        paths.push(path);
    }

    let known: Vec<u64> = segments.iter().filter_map(|s| s.size).collect();
    let total = (!known.is_empty()).then(|| known.iter().sum::<u64>());

    let counter = Arc::new(AtomicU64::new(on_disk));
    let source = ProgressSource::Bytes {
        counter: Arc::clone(&counter),
        total,
    };
    tracing::info!(
        release = %ctx.id,
        segments = segments.len(),
        total_bytes = ?total,
        resumed_bytes = on_disk,
        "Downloading segments"
    );

    let stop = ctx.cancel.child_token();
    let reporter = spawn_progress_reporter(ProgressReporterParams {
        tracker: Arc::clone(&ctx.progress),
        source: source.clone(),
        start: 0.0,
        end: DOWNLOAD_PHASE_END,
        interval: config.download.progress_interval,
        stop: stop.clone(),
    });

    let result = fetch_segments(ctx, &segments, &paths, &counter).await;
    stop.cancel();
    reporter.await.ok();

    // Persist the final byte count even for a paused or failed transfer
    source.report(&ctx.progress, 0.0, DOWNLOAD_PHASE_END).await;
    result?;

    Ok(segments)
}

async fn fetch_segments(
    ctx: &TaskContext,
    segments: &[Segment],
    paths: &[PathBuf],
    counter: &AtomicU64,
) -> Result<()> {
    let fetcher = &ctx.sideloader.transfer.fetcher;
    for (segment, path) in segments.iter().zip(paths) {
        ctx.check_cancelled()?;
        let outcome = fetcher.fetch(segment, path, counter, &ctx.cancel).await?;
        tracing::debug!(
            release = %ctx.id,
            segment = %segment.name,
            size = outcome.size(),
            ?outcome,
            "Segment ready"
        );
    }
    Ok(())
}

/// Merge, extract and mark the release as extracted
async fn extraction_phase(ctx: &TaskContext, segments: &[Segment]) -> Result<()> {
    ctx.enter_phase(Status::Extracting).await?;
    let retained = ctx.retained();

    // Leftovers of an interrupted extraction are never trusted
    crate::utils::remove_path(&ctx.extract_dir).await?;
    tokio::fs::create_dir_all(&ctx.extract_dir).await?;

    let loose: Vec<String> = segments
        .iter()
        .filter(|s| {
            matches!(
                s.kind(),
                Some(ArtifactKind::Package) | Some(ArtifactKind::Expansion)
            )
        })
        .map(|s| s.name.clone())
        .collect();

    if space_guard::is_uncompressed_release(segments) {
        tracing::info!(release = %ctx.id, files = loose.len(), "Release is not archived, staging files");
        extraction::stage_uncompressed(&ctx.download_dir, &loose, &ctx.extract_dir).await?;
        ctx.progress.report(EXTRACT_PHASE_END, None, None).await;
    } else {
        let mut local = Vec::with_capacity(segments.len());
        for segment in segments {
            local.push(ctx.segment_path(segment)?);
        }
        let archives = extraction::plan_archives(&local);

        let containers = merge_archives(ctx, &archives).await?;
        extract_containers(ctx, &containers).await?;

        if !loose.is_empty() {
            extraction::stage_uncompressed(&ctx.download_dir, &loose, &ctx.extract_dir).await?;
        }
        write_extraction_marker(ctx).await?;

        // Downloads are only dropped once the marker makes them unnecessary
        if retained {
            for archive in &archives {
                if let ArchiveSource::Split { container, .. } = archive {
                    crate::utils::remove_path(container).await?;
                }
            }
        } else {
            crate::utils::remove_path(&ctx.download_dir).await?;
        }
        return Ok(());
    }

    write_extraction_marker(ctx).await
}

async fn write_extraction_marker(ctx: &TaskContext) -> Result<()> {
    let marker = ExtractionMarker {
        release_id: ctx.id.clone(),
        files: relative_files(&ctx.extract_dir)?,
        extracted_at: chrono::Utc::now(),
    };
    recovery::write_marker(&ctx.sideloader.config.download.extract_dir, &marker).await?;
    Ok(())
}

/// Concatenate split archives into their containers
///
/// Parts stay on disk so an interrupted extraction resumes without downloading.
async fn merge_archives(ctx: &TaskContext, archives: &[ArchiveSource]) -> Result<Vec<PathBuf>> {
    let stage = Arc::new(StageProgress::new());
    let source = ProgressSource::Stage(Arc::clone(&stage));
    let stop = ctx.cancel.child_token();
    let reporter = spawn_progress_reporter(ProgressReporterParams {
        tracker: Arc::clone(&ctx.progress),
        source: source.clone(),
        start: DOWNLOAD_PHASE_END,
        end: MERGE_PHASE_END,
        interval: ctx.sideloader.config.download.progress_interval,
        stop: stop.clone(),
    });

    let mut containers = Vec::with_capacity(archives.len());
    let mut result = Ok(());
    for archive in archives {
        match extraction::assemble(archive, true, &stage, &ctx.cancel).await {
            Ok(container) => containers.push(container),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    stop.cancel();
    reporter.await.ok();
    result?;

    ctx.progress.report(MERGE_PHASE_END, None, None).await;
    Ok(containers)
}

/// Extract the installable entries of every container, holding the wake lock
async fn extract_containers(ctx: &TaskContext, containers: &[PathBuf]) -> Result<()> {
    let config = &ctx.sideloader.config;
    let passwords = PasswordList::collect(
        config.mirror.archive_password.as_deref(),
        config.mirror.try_empty_password,
    );

    let stage = Arc::new(StageProgress::new());
    let stop = ctx.cancel.child_token();
    let reporter = spawn_progress_reporter(ProgressReporterParams {
        tracker: Arc::clone(&ctx.progress),
        source: ProgressSource::Stage(Arc::clone(&stage)),
        start: MERGE_PHASE_END,
        end: EXTRACT_PHASE_END,
        interval: config.download.progress_interval,
        stop: stop.clone(),
    });

    let hold = ctx.sideloader.wake_lock.hold();
    let mut result = Ok(());
    for container in containers {
        match extraction::extract_archive(
            container,
            &ctx.extract_dir,
            &passwords,
            Arc::clone(&stage),
            &ctx.cancel,
        )
        .await
        {
            Ok(files) => {
                tracing::info!(
                    release = %ctx.id,
                    ?container,
                    files = files.len(),
                    "Archive extracted"
                );
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    drop(hold);
    stop.cancel();
    reporter.await.ok();
    result?;

    ctx.progress.report(EXTRACT_PHASE_END, None, None).await;
    Ok(())
}

/// Place expansion files, stage and verify the package, then install it
async fn install_phase(ctx: &TaskContext) -> Result<()> {
    let sideloader = &ctx.sideloader;
    let config = &sideloader.config;
    let package_name = ctx.entry.package_name.as_str();

    ctx.enter_phase(Status::CopyingObb).await?;
    let obbs = install::find_expansions(&ctx.extract_dir)?;
    let placed = install::place_expansions(&obbs, &config.install.obb_root, package_name).await?;
    tracing::info!(
        release = %ctx.id,
        package = package_name,
        count = placed.len(),
        "Expansion files placed"
    );
    ctx.progress.report(OBB_PHASE_END, None, None).await;

    ctx.enter_phase(Status::Installing).await?;
    let release_hash = ctx.id.hash();
    let staged = stage_or_reuse(ctx, &config.install.staging_dir, &release_hash).await?;
    ctx.progress.report(STAGE_PHASE_END, None, None).await;

    if let Err(e) = hand_off(ctx, &staged).await {
        // A paused task reuses its staged package when resumed
        if !e.is_cancelled()
            && let Err(remove) = crate::utils::remove_path(&staged).await
        {
            tracing::warn!(release = %ctx.id, ?staged, error = %remove, "Failed to remove staged package");
        }
        return Err(e);
    }

    recovery::remove_marker(&config.download.extract_dir, &ctx.id).await?;
    ctx.progress.report(1.0, None, None).await;

    let mut scratch = vec![staged, ctx.extract_dir.clone()];
    if !ctx.retained() {
        scratch.push(ctx.download_dir.clone());
    }
    install::schedule_cleanup(scratch, config.install.cleanup_grace);
    Ok(())
}

/// Verify the staged package and pass it to the installer
async fn hand_off(ctx: &TaskContext, staged: &Path) -> Result<()> {
    let sideloader = &ctx.sideloader;
    let package_name = ctx.entry.package_name.as_str();

    install::verify_package(staged, Some(package_name)).await?;
    ctx.check_cancelled()?;

    tracing::info!(
        release = %ctx.id,
        package = package_name,
        installer = sideloader.installer.name(),
        "Installing package"
    );
    sideloader.installer.install(staged, package_name).await
}

/// Stage the extracted package, or reuse one staged by an interrupted run
async fn stage_or_reuse(ctx: &TaskContext, staging_dir: &Path, release_hash: &str) -> Result<PathBuf> {
    let package_name = ctx.entry.package_name.as_str();
    match install::find_package(&ctx.extract_dir) {
        Ok(package) => {
            install::stage_package(&package, staging_dir, package_name, release_hash).await
        }
        Err(e) => {
            let staged = install::staged_package_path(staging_dir, package_name, release_hash);
            if tokio::fs::try_exists(&staged).await? {
                tracing::info!(release = %ctx.id, ?staged, "Reusing package staged by an earlier run");
                Ok(staged)
            } else {
                Err(e)
            }
        }
    }
}

/// Files under `dir`, relative to it with `/` separators
pub(super) fn relative_files(dir: &Path) -> Result<Vec<String>> {
    Ok(extraction::collect_files(dir)?
        .iter()
        .filter_map(|path| path.strip_prefix(dir).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect())
}
