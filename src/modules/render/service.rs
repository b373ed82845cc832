use std::path::PathBuf;

use bytes::Bytes;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::archive;
use super::dto::RenderOverrides;
use super::error::RenderResult;
use super::model::{Job, JobState, OUTPUT_CONTAINER};
use super::params::{input_pattern, EncodeDefaults, EncodeParams};
use super::sequence;
use crate::infrastructure::storage::workspace::Workspace;
use crate::state::AppState;

/// A finished encode. Owns the workspace, so the file stays on disk exactly
/// as long as this value (or whatever it is moved into) is alive.
#[derive(Debug)]
pub struct RenderOutput {
    pub job_id: Uuid,
    pub path: PathBuf,
    pub size: u64,
    pub workspace: Workspace,
}

pub struct RenderService;

impl RenderService {
    pub async fn render(
        state: &AppState,
        archive: Bytes,
        overrides: RenderOverrides,
    ) -> RenderResult<RenderOutput> {
        let params = EncodeParams::build(&overrides, &EncodeDefaults::default());
        let workspace =
            Workspace::create(&state.config.work_root, &state.config.workspace_prefix).await?;

        let mut job = Job::new(workspace, params);
        let span = info_span!("render", job_id = %job.id());

        async move {
            info!(bytes = archive.len(), "render job started");

            match Self::run(state, &mut job, archive).await {
                Ok((path, size)) => {
                    info!(size, "render job finished");
                    Ok(RenderOutput {
                        job_id: job.id(),
                        path,
                        size,
                        workspace: job.workspace,
                    })
                }
                Err(e) => {
                    let stage = job.state.next_stage();
                    job.state = JobState::Failed(stage);
                    error!(stage = %stage, error = %e, "render job failed");

                    let e = e.scrub(job.workspace.path());
                    job.workspace.close().await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs the stages in order; the first failure aborts the rest.
    async fn run(state: &AppState, job: &mut Job, archive: Bytes) -> RenderResult<(PathBuf, u64)> {
        let frames_dir = job.workspace.frames_dir();

        let files = archive::extract(archive, frames_dir.clone(), state.config.max_extracted_bytes).await?;
        Self::advance(job, JobState::Extracted);
        info!(files, "archive extracted");

        let names = sequence::list_entries(&frames_dir).await?;
        let frames = sequence::plan(names, state.config.frame_order)?;
        sequence::normalize(&frames_dir, &frames, &state.encoder).await?;
        Self::advance(job, JobState::Normalized { frames: frames.len() });
        info!(frames = frames.len(), "frames normalized");

        let output = job.workspace.output_path(OUTPUT_CONTAINER);
        let args = job.params.encode_args(&input_pattern(&frames_dir), &output);
        info!(
            fps = job.params.fps,
            width = job.params.width,
            height = job.params.height,
            gop = job.params.gop,
            "encoding sequence"
        );
        state.encoder.run(&args).await?;
        Self::advance(job, JobState::Encoded);

        let size = tokio::fs::metadata(&output).await?.len();
        Ok((output, size))
    }

    fn advance(job: &mut Job, next: JobState) {
        tracing::debug!(from = ?job.state, to = ?next, "job state");
        job.state = next;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::settings::AppConfig;
    use crate::modules::render::error::RenderError;
    use crate::infrastructure::encoder::ffmpeg::testing::{fake_encoder, WRITES_LAST_ARG};
    use crate::infrastructure::storage::workspace::testing::{entries, wait_until_empty};
    use crate::modules::render::archive::testing::zip_of;

    fn state_with(root: &std::path::Path, encoder: PathBuf) -> AppState {
        AppState::new(AppConfig {
            ffmpeg_bin: encoder,
            work_root: root.to_path_buf(),
            ..AppConfig::default()
        })
    }

    #[tokio::test]
    async fn successful_render_keeps_workspace_until_output_is_dropped() {
        let root = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        let state = state_with(root.path(), fake_encoder(bins.path(), "ffmpeg", WRITES_LAST_ARG));
        let archive = zip_of(&[("a.png", b"png"), ("b.jpg", b"jpg")]);

        let output = RenderService::render(&state, archive, RenderOverrides::default())
            .await
            .unwrap();

        assert_eq!(output.size, 4);
        assert_eq!(std::fs::read(&output.path).unwrap(), b"fake");
        let frames = output.workspace.frames_dir();
        assert!(frames.join("frame_0001.png").exists());
        assert!(frames.join("frame_0002.png").exists());

        drop(output);
        assert!(wait_until_empty(root.path()).await.is_empty());
    }

    #[tokio::test]
    async fn failures_remove_the_workspace_before_returning() {
        let root = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        let state = state_with(root.path(), fake_encoder(bins.path(), "ffmpeg", WRITES_LAST_ARG));

        let err = RenderService::render(&state, Bytes::from_static(b"junk"), RenderOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.label(), "extraction_failed");
        assert!(entries(root.path()).is_empty());

        let err = RenderService::render(&state, zip_of(&[("readme.txt", b"hi")]), RenderOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.label(), "no_valid_frames");
        assert!(entries(root.path()).is_empty());
    }

    #[tokio::test]
    async fn archive_expanding_past_the_configured_ceiling_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        let state = AppState::new(AppConfig {
            ffmpeg_bin: fake_encoder(bins.path(), "ffmpeg", WRITES_LAST_ARG),
            work_root: root.path().to_path_buf(),
            max_extracted_bytes: 16,
            ..AppConfig::default()
        });
        let big = vec![7u8; 4096];

        let err = RenderService::render(&state, zip_of(&[("a.png", big.as_slice())]), RenderOverrides::default())
            .await
            .unwrap_err();

        assert_eq!(err.label(), "extraction_failed");
        assert!(entries(root.path()).is_empty());
    }

    #[tokio::test]
    async fn no_valid_frames_never_reaches_the_encoder() {
        let root = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        let marker = bins.path().join("called");
        let bin = fake_encoder(bins.path(), "ffmpeg", &format!("touch '{}'", marker.display()));
        let state = state_with(root.path(), bin);

        let err = RenderService::render(&state, zip_of(&[("a.gif", b"gif")]), RenderOverrides::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RenderError::NoValidFrames));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn encoder_failure_surfaces_scrubbed_diagnostics() {
        let root = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        let bin = fake_encoder(
            bins.path(),
            "ffmpeg",
            r#"for arg in "$@"; do last="$arg"; done
echo "$last: Invalid argument" >&2
exit 1"#,
        );
        let state = state_with(root.path(), bin);

        let err = RenderService::render(&state, zip_of(&[("a.png", b"png")]), RenderOverrides::default())
            .await
            .unwrap_err();

        assert_eq!(err.label(), "encode_failed");
        let detail = err.detail().unwrap();
        assert!(detail.contains("<workspace>/output.mp4: Invalid argument"), "{detail}");
        assert!(!detail.contains(&root.path().display().to_string()));
        assert!(entries(root.path()).is_empty());
    }

    /// `/proc/<pid>/stat` is gone once the child is reaped, and reads `Z` while it awaits reaping.
    #[cfg(target_os = "linux")]
    fn process_finished(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn dropping_an_in_flight_render_kills_the_encoder_and_removes_the_workspace() {
        let root = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        let pid_file = bins.path().join("pid");
        let bin = fake_encoder(
            bins.path(),
            "ffmpeg",
            &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
        );
        let state = state_with(root.path(), bin);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            RenderService::render(&state, zip_of(&[("a.png", b"png")]), RenderOverrides::default()),
        )
        .await;
        assert!(outcome.is_err(), "the encoder should still be running");

        assert!(wait_until_empty(root.path()).await.is_empty());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(!pid.is_empty());

        #[cfg(target_os = "linux")]
        {
            let mut finished = false;
            for _ in 0..100 {
                if process_finished(&pid) {
                    finished = true;
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            assert!(finished, "encoder process {} outlived the request", pid);
        }
    }

    #[tokio::test]
    async fn final_encode_receives_the_indexed_pattern() {
        let root = tempfile::tempdir().unwrap();
        let bins = tempfile::tempdir().unwrap();
        let log = bins.path().join("args.log");
        let bin = fake_encoder(
            bins.path(),
            "ffmpeg",
            &format!(
                "echo \"$@\" >> '{}'\n{}",
                log.display(),
                WRITES_LAST_ARG
            ),
        );
        let state = state_with(root.path(), bin);
        let overrides = RenderOverrides {
            fps: Some(12.0),
            ..Default::default()
        };

        let output = RenderService::render(&state, zip_of(&[("1.png", b"a"), ("2.png", b"b")]), overrides)
            .await
            .unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = logged.lines().collect();
        assert_eq!(lines.len(), 1, "png-only uploads need a single encoder call");
        assert!(lines[0].starts_with("-y -r 12 -i "));
        assert!(lines[0].contains("frames/frame_%04d.png"));
        assert!(lines[0].contains("-g 24"));
        drop(output);
    }
}
