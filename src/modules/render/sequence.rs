use std::cmp::Ordering;
use std::ffi::OsStr;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::infrastructure::encoder::ffmpeg::{Encoder, EncoderError};
use super::error::{RenderError, RenderResult};
use super::model::{FrameEntry, FrameFormat, FrameOrder};
use super::params::convert_args;

/// Names of the regular files directly inside `dir`. Hidden files and
/// subdirectories are not frame candidates.
pub async fn list_entries(dir: &Path) -> RenderResult<Vec<String>> {
    let mut read_dir = fs::read_dir(dir)
        .await
        .map_err(|e| RenderError::normalization(format!("cannot list frames: {}", e)))?;

    let mut names = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| RenderError::normalization(format!("cannot list frames: {}", e)))?
    {
        let file_name = entry.file_name();
        if !regular_file(&file_name, entry.file_type().await)? {
            continue;
        }
        match file_name.into_string() {
            Ok(name) if !name.starts_with('.') => names.push(name),
            Ok(_) => {}
            Err(raw) => debug!(name = ?raw, "skipping non UTF-8 file name"),
        }
    }

    Ok(names)
}

fn regular_file(name: &OsStr, file_type: std::io::Result<std::fs::FileType>) -> RenderResult<bool> {
    file_type.map(|t| t.is_file()).map_err(|e| {
        RenderError::normalization(format!("cannot inspect '{}': {}", name.to_string_lossy(), e))
    })
}

/// Keeps supported images, orders them and hands out indices `1..=N`.
pub fn plan(names: Vec<String>, order: FrameOrder) -> RenderResult<Vec<FrameEntry>> {
    let mut frames: Vec<(String, FrameFormat)> = names
        .into_iter()
        .filter_map(|name| FrameFormat::from_file_name(&name).map(|format| (name, format)))
        .collect();

    if frames.is_empty() {
        return Err(RenderError::NoValidFrames);
    }

    match order {
        FrameOrder::Lexical => frames.sort_by(|a, b| a.0.cmp(&b.0)),
        FrameOrder::Natural => frames.sort_by(|a, b| natural_cmp(&a.0, &b.0)),
    }

    Ok(frames
        .into_iter()
        .zip(1u32..)
        .map(|((original_name, format), index)| FrameEntry {
            original_name,
            format,
            index,
        })
        .collect())
}

/// Rewrites the planned frames in `dir` into `frame_0001.png ... frame_NNNN.png`.
///
/// Sources are first moved to hidden staging names so an upload that already
/// contains, say, `frame_0001.png` can't be clobbered by another frame's target.
/// Then every frame is processed strictly in order, one encoder call at a time.
pub async fn normalize(dir: &Path, frames: &[FrameEntry], encoder: &Encoder) -> RenderResult<()> {
    let mut staged = Vec::with_capacity(frames.len());
    for frame in frames {
        let from = dir.join(&frame.original_name);
        let to = dir.join(staging_name(frame));
        fs::rename(&from, &to).await.map_err(|e| {
            RenderError::normalization(format!("cannot stage '{}': {}", frame.original_name, e))
        })?;
        staged.push(to);
    }

    for (frame, source) in frames.iter().zip(staged) {
        let target = dir.join(frame.target_name());

        if frame.format.is_canonical() {
            move_file(&source, &target).await.map_err(|e| {
                RenderError::normalization(format!("cannot move '{}': {}", frame.original_name, e))
            })?;
        } else {
            convert(encoder, frame, &source, &target).await?;
        }

        debug!(from = %frame.original_name, to = %frame.target_name(), "frame normalized");
    }

    Ok(())
}

fn staging_name(frame: &FrameEntry) -> String {
    let ext = match frame.format {
        FrameFormat::Png => "png",
        FrameFormat::Jpeg => "jpg",
    };
    format!(".pending_{:04}.{}", frame.index, ext)
}

async fn convert(encoder: &Encoder, frame: &FrameEntry, source: &Path, target: &Path) -> RenderResult<()> {
    match encoder.run(&convert_args(source, target)).await {
        Ok(_) => {}
        Err(EncoderError::Failed { code, diagnostics }) => {
            return Err(RenderError::normalization(format!(
                "cannot convert '{}' (encoder status {}): {}",
                frame.original_name,
                code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                diagnostics.trim_end()
            )));
        }
        Err(EncoderError::Io(e)) => {
            return Err(RenderError::normalization(format!(
                "cannot convert '{}': {}",
                frame.original_name, e
            )));
        }
        // A missing binary or a blown deadline is not the frame's fault.
        Err(other) => return Err(other.into()),
    }

    fs::remove_file(source).await.map_err(|e| {
        RenderError::normalization(format!("cannot remove '{}': {}", frame.original_name, e))
    })
}

/// Rename, falling back to copy + delete when a plain rename is refused
/// (e.g. the workspace spans two filesystems).
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("rename failed ({}), copying instead", e);
            let data = fs::read(from).await?;
            fs::write(to, data).await?;
            fs::remove_file(from).await
        }
    }
}

/// Orders digit runs by value and everything else byte-wise.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a_rest, mut b_rest) = (a, b);

    loop {
        match (a_rest.is_empty(), b_rest.is_empty()) {
            (true, true) => return a.cmp(b),
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }

        let (a_chunk, a_tail) = split_chunk(a_rest);
        let (b_chunk, b_tail) = split_chunk(b_rest);

        let a_digits = a_chunk.starts_with(|c: char| c.is_ascii_digit());
        let b_digits = b_chunk.starts_with(|c: char| c.is_ascii_digit());

        let ord = if a_digits && b_digits {
            let a_num = a_chunk.trim_start_matches('0');
            let b_num = b_chunk.trim_start_matches('0');
            a_num.len().cmp(&b_num.len()).then_with(|| a_num.cmp(b_num))
        } else {
            a_chunk.cmp(b_chunk)
        };

        if ord != Ordering::Equal {
            return ord;
        }
        a_rest = a_tail;
        b_rest = b_tail;
    }
}

/// Splits off the leading run of either digits or non-digits.
fn split_chunk(s: &str) -> (&str, &str) {
    let digits = s.starts_with(|c: char| c.is_ascii_digit());
    let end = s
        .find(|c: char| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());
    s.split_at(end)
}
