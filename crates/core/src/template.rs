//! Command-template rewriting for the external transcoding tool.
//!
//! A caller supplies a raw argument template such as
//! `-i $BUF0 $PRESET $OUT`. Rewriting is a fixed pipeline of pure steps:
//!
//! 1. strip embedded newlines,
//! 2. resolve the effective output extension,
//! 3. substitute `$PRESET`,
//! 4. substitute `$OUT` with container/codec flags and the stdout marker,
//! 5. prefix verbosity and banner flags,
//! 6. replace each `$BUFn` with the staging URL of input `n`.
//!
//! Only [`prepare`] has side effects: it stages the inputs in the
//! [`BufferRegistry`] between steps 5 and 6.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::{Captures, Regex};

use crate::error::CoreError;
use crate::extension::file_extension;
use crate::registry::BufferRegistry;

/// Placeholder replaced by the speed preset flag.
pub const PRESET_PLACEHOLDER: &str = "$PRESET";

/// Placeholder replaced by output-format flags plus the stdout marker.
pub const OUT_PLACEHOLDER: &str = "$OUT";

/// Output extensions that receive the fast encoder preset.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv"];

/// Preset flag applied to video-like outputs.
pub const FAST_PRESET: &str = "-preset ultrafast";

/// Always-on flag suppressing the tool's startup banner.
pub const HIDE_BANNER_FLAG: &str = "-hide_banner";

/// Matches `$BUF0`, `$BUF12`, ... capturing the full index.
static BUFFER_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$BUF([0-9]+)").expect("valid regex"));

/// One input buffer plus the filename it was uploaded under.
#[derive(Debug, Clone)]
pub struct InputBuffer {
    pub data: Bytes,
    /// Original filename; only its extension is used.
    pub filename: String,
}

impl InputBuffer {
    pub fn new(data: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
        }
    }

    /// Lower-cased extension of the original filename.
    pub fn extension(&self) -> String {
        file_extension(&self.filename.to_lowercase()).to_string()
    }
}

/// Options that shape the rewritten command.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Requested output extension; inferred from the first input when `None`.
    pub out_ext: Option<String>,
    /// Whether progress updates are streamed back to the caller.
    pub streaming: bool,
    /// Diagnostic mode: force info-level verbosity.
    pub verbose: bool,
}

/// A fully rewritten command ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    /// The single trimmed argument line.
    pub line: String,
    /// `line` split on whitespace.
    pub args: Vec<String>,
    /// Registry identifiers staged for this command, in input order.
    pub staged_ids: Vec<String>,
    /// Effective output extension.
    pub output_extension: String,
}

// ---------------------------------------------------------------------------
// Pure steps
// ---------------------------------------------------------------------------

/// Remove `\r\n` and `\n` sequences from a template.
pub fn strip_newlines(template: &str) -> String {
    template.replace("\r\n", "").replace('\n', "")
}

/// Explicit extension when given, else the first input's extension.
pub fn effective_output_extension(
    out_ext: Option<&str>,
    inputs: &[InputBuffer],
) -> Result<String, CoreError> {
    match out_ext.map(str::trim).filter(|e| !e.is_empty()) {
        Some(ext) => Ok(ext.to_lowercase()),
        None => inputs.first().map(InputBuffer::extension).ok_or_else(|| {
            CoreError::Validation(
                "no output extension given and no input buffer to infer it from".into(),
            )
        }),
    }
}

/// Speed preset for an output extension; empty for non-video outputs.
pub fn preset_for(extension: &str) -> &'static str {
    if VIDEO_EXTENSIONS.contains(&file_extension(extension)) {
        FAST_PRESET
    } else {
        ""
    }
}

/// Container/codec flags for an output extension.
pub fn output_format_for(extension: &str) -> String {
    match extension {
        "png" => "-f image2 -c png".to_string(),
        "jpg" | "jpeg" => "-f image2 -c mjpeg".to_string(),
        "mp4" => "-pix_fmt yuv420p -f mp4 -movflags faststart+frag_keyframe+empty_moov".to_string(),
        other => format!("-f {other}"),
    }
}

/// Verbosity flag for the tool's diagnostic stream.
pub fn verbosity_flag(streaming: bool, verbose: bool) -> &'static str {
    if streaming || verbose {
        "-v info"
    } else {
        "-v warning"
    }
}

pub fn substitute_preset(template: &str, extension: &str) -> String {
    template.replace(PRESET_PLACEHOLDER, preset_for(extension))
}

/// Replace `$OUT` with the format flags followed by `-` (write to stdout).
pub fn substitute_output(template: &str, extension: &str) -> String {
    template.replace(
        OUT_PLACEHOLDER,
        &format!("{} -", output_format_for(extension)),
    )
}

/// Prefix the verbosity and banner flags and trim the result.
pub fn prefix_flags(template: &str, streaming: bool, verbose: bool) -> String {
    format!(
        "{} {HIDE_BANNER_FLAG} {template}",
        verbosity_flag(streaming, verbose)
    )
    .trim()
    .to_string()
}

/// Distinct `$BUFn` indices referenced by a template.
///
/// An index too large to address any buffer is a validation error.
pub fn referenced_buffers(template: &str) -> Result<BTreeSet<usize>, CoreError> {
    BUFFER_PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| {
            caps[1].parse::<usize>().map_err(|_| {
                CoreError::Validation(format!("buffer index out of range: $BUF{}", &caps[1]))
            })
        })
        .collect()
}

/// Replace each `$BUFn` with `base_url` + the `n`th staged identifier.
///
/// Fails if a placeholder refers to an identifier that does not exist.
pub fn substitute_buffers(
    template: &str,
    base_url: &str,
    staged_ids: &[String],
) -> Result<String, CoreError> {
    check_buffer_references(template, staged_ids.len())?;
    Ok(BUFFER_PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let index: usize = caps[1].parse().unwrap_or(usize::MAX);
            staged_ids
                .get(index)
                .map(|id| format!("{base_url}{id}"))
                .unwrap_or_default()
        })
        .into_owned())
}

fn check_buffer_references(template: &str, available: usize) -> Result<(), CoreError> {
    match referenced_buffers(template)?
        .into_iter()
        .find(|&index| index >= available)
    {
        Some(index) => Err(CoreError::Validation(format!(
            "template references $BUF{index} but only {available} buffer(s) were supplied"
        ))),
        None => Ok(()),
    }
}

/// Split a finished argument line for process invocation.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Run steps 1 through 5, returning the line with `$BUFn` still in place
/// and the effective output extension.
pub fn render(
    template: &str,
    inputs: &[InputBuffer],
    options: &RenderOptions,
) -> Result<(String, String), CoreError> {
    let stripped = strip_newlines(template);
    let extension = effective_output_extension(options.out_ext.as_deref(), inputs)?;
    let with_preset = substitute_preset(&stripped, &extension);
    let with_output = substitute_output(&with_preset, &extension);
    let line = prefix_flags(&with_output, options.streaming, options.verbose);
    Ok((line, extension))
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// Rewrite `template` and stage every input in `registry`.
///
/// Placeholder references are validated before anything is staged, so a
/// rejected template leaves the registry untouched. On success the caller
/// owns the returned `staged_ids` and must delete them when the job ends.
pub async fn prepare(
    template: &str,
    inputs: &[InputBuffer],
    options: &RenderOptions,
    registry: &BufferRegistry,
    base_url: &str,
) -> Result<PreparedCommand, CoreError> {
    let (line, output_extension) = render(template, inputs, options)?;
    check_buffer_references(&line, inputs.len())?;

    let mut staged_ids = Vec::with_capacity(inputs.len());
    for input in inputs {
        staged_ids.push(registry.register(input.data.clone(), &input.extension()).await);
    }

    let line = substitute_buffers(&line, base_url, &staged_ids)?;
    Ok(PreparedCommand {
        args: tokenize(&line),
        line,
        staged_ids,
        output_extension,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const BASE: &str = "http://localhost:56033/";

    fn png_input() -> InputBuffer {
        InputBuffer::new(Bytes::from_static(b"png-bytes"), "in.png")
    }

    #[test]
    fn output_format_mapping_is_exact() {
        assert_eq!(output_format_for("png"), "-f image2 -c png");
        assert_eq!(output_format_for("jpg"), "-f image2 -c mjpeg");
        assert_eq!(output_format_for("jpeg"), "-f image2 -c mjpeg");
        assert_eq!(
            output_format_for("mp4"),
            "-pix_fmt yuv420p -f mp4 -movflags faststart+frag_keyframe+empty_moov"
        );
        assert_eq!(output_format_for("zzz"), "-f zzz");
    }

    #[test]
    fn preset_only_for_video_outputs() {
        assert_eq!(preset_for("mp4"), FAST_PRESET);
        assert_eq!(preset_for("mkv"), FAST_PRESET);
        assert_eq!(preset_for("png"), "");
        assert_eq!(preset_for("jpg"), "");
    }

    #[test]
    fn verbosity_follows_streaming_flag() {
        assert_eq!(verbosity_flag(true, false), "-v info");
        assert_eq!(verbosity_flag(false, false), "-v warning");
        assert_eq!(verbosity_flag(false, true), "-v info");
    }

    #[test]
    fn newlines_are_stripped() {
        assert_eq!(strip_newlines("-i $BUF0\r\n-y\n$OUT"), "-i $BUF0-y$OUT");
    }

    #[test]
    fn output_extension_prefers_explicit_value() {
        let ext = effective_output_extension(Some("MP4"), &[png_input()]).unwrap();
        assert_eq!(ext, "mp4");
    }

    #[test]
    fn output_extension_falls_back_to_first_input() {
        let inputs = [
            InputBuffer::new(Bytes::new(), "Frame.JPG"),
            InputBuffer::new(Bytes::new(), "audio.wav"),
        ];
        assert_eq!(effective_output_extension(None, &inputs).unwrap(), "jpg");
        assert_eq!(effective_output_extension(Some(""), &inputs).unwrap(), "jpg");
    }

    #[test]
    fn output_extension_needs_some_source() {
        assert_matches!(
            effective_output_extension(None, &[]),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn render_applies_steps_in_order() {
        let options = RenderOptions {
            out_ext: Some("mp4".into()),
            streaming: true,
            verbose: false,
        };
        let (line, ext) = render("-i $BUF0\n $PRESET $OUT", &[png_input()], &options).unwrap();

        assert_eq!(ext, "mp4");
        assert_eq!(
            line,
            "-v info -hide_banner -i $BUF0 -preset ultrafast \
             -pix_fmt yuv420p -f mp4 -movflags faststart+frag_keyframe+empty_moov -"
        );
    }

    #[test]
    fn substitute_buffers_handles_multi_digit_indices() {
        let ids: Vec<String> = (0..12).map(|i| format!("id{i}.png")).collect();
        let line = substitute_buffers("-i $BUF1 -i $BUF11", BASE, &ids).unwrap();
        assert_eq!(
            line,
            "-i http://localhost:56033/id1.png -i http://localhost:56033/id11.png"
        );
    }

    #[test]
    fn substitute_buffers_rejects_unknown_index() {
        let ids = vec!["a.png".to_string()];
        assert_matches!(
            substitute_buffers("-i $BUF0 -i $BUF1", BASE, &ids),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn oversized_buffer_index_is_rejected() {
        let ids = vec!["a.png".to_string()];
        assert_matches!(
            substitute_buffers("-i $BUF99999999999999999999", BASE, &ids),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn tokenize_collapses_whitespace() {
        assert_eq!(tokenize("  -i   a  -y "), vec!["-i", "a", "-y"]);
    }

    #[tokio::test]
    async fn prepare_stages_inputs_with_their_own_extension() {
        let registry = BufferRegistry::new();
        let inputs = [png_input(), InputBuffer::new(Bytes::from_static(b"w"), "Track.WAV")];
        let options = RenderOptions {
            out_ext: Some("mp4".into()),
            ..Default::default()
        };

        let prepared = prepare("-i $BUF0 -i $BUF1 $OUT", &inputs, &options, &registry, BASE)
            .await
            .unwrap();

        assert_eq!(prepared.staged_ids.len(), 2);
        assert!(prepared.staged_ids[0].ends_with(".png"));
        assert!(prepared.staged_ids[1].ends_with(".wav"));
        assert_eq!(prepared.args[0], "-v");
        assert_eq!(prepared.args[1], "warning");
        assert_eq!(prepared.args[2], "-hide_banner");
        assert_eq!(prepared.args[4], format!("{BASE}{}", prepared.staged_ids[0]));
        assert_eq!(prepared.args.last().map(String::as_str), Some("-"));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn prepare_infers_png_from_first_input() {
        let registry = BufferRegistry::new();
        let prepared = prepare(
            "-i $BUF0 $PRESET $OUT",
            &[png_input()],
            &RenderOptions::default(),
            &registry,
            BASE,
        )
        .await
        .unwrap();

        assert_eq!(prepared.output_extension, "png");
        assert_eq!(
            prepared.line,
            format!(
                "-v warning -hide_banner -i {BASE}{}  -f image2 -c png -",
                prepared.staged_ids[0]
            )
        );
        assert_eq!(
            prepared.args,
            vec![
                "-v".to_string(),
                "warning".into(),
                "-hide_banner".into(),
                "-i".into(),
                format!("{BASE}{}", prepared.staged_ids[0]),
                "-f".into(),
                "image2".into(),
                "-c".into(),
                "png".into(),
                "-".into(),
            ]
        );
    }

    #[tokio::test]
    async fn prepare_rejects_before_staging_anything() {
        let registry = BufferRegistry::new();
        let result = prepare(
            "-i $BUF3 $OUT",
            &[png_input()],
            &RenderOptions::default(),
            &registry,
            BASE,
        )
        .await;

        assert_matches!(result, Err(CoreError::Validation(_)));
        assert!(registry.is_empty().await);
    }
}
