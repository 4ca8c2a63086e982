//! Error reporting for the terminal
//!
//! Every library error carries a stable code; the exit status follows from
//! it. Manifest errors with a `row` are also drawn against the source file.

use std::fs;
use std::ops::Range;
use std::path::Path;

use ariadne::{Color, Label, Report, ReportKind, Source};
use spinta_backends::BackendError;
use spinta_core::{CoreError, ErrorCode, ErrorReport, Reportable};
use spinta_keymap::KeymapError;
use spinta_manifest::ManifestError;
use spinta_scripts::ScriptError;
use spinta_spyna::SpynaError;

/// First library error in the chain
fn reportable(error: &anyhow::Error) -> Option<&dyn Reportable> {
    error.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<ManifestError>() {
            return Some(e as &dyn Reportable);
        }
        if let Some(e) = cause.downcast_ref::<BackendError>() {
            return Some(e as &dyn Reportable);
        }
        if let Some(e) = cause.downcast_ref::<KeymapError>() {
            return Some(e as &dyn Reportable);
        }
        if let Some(e) = cause.downcast_ref::<ScriptError>() {
            return Some(e as &dyn Reportable);
        }
        if let Some(e) = cause.downcast_ref::<SpynaError>() {
            return Some(e as &dyn Reportable);
        }
        cause.downcast_ref::<CoreError>().map(|e| e as &dyn Reportable)
    })
}

pub fn error_code(error: &anyhow::Error) -> Option<ErrorCode> {
    reportable(error).map(|e| e.code())
}

/// 1 for configuration and validation failures, 2 for runtime failures
pub fn exit_code(error: &anyhow::Error) -> i32 {
    error_code(error).map(|code| code.exit_code()).unwrap_or(1)
}

/// `error[Code]: message` followed by the JSON envelope when there is one
pub fn describe(error: &anyhow::Error) -> String {
    match reportable(error) {
        Some(e) => format!(
            "error[{}]: {:#}\n{}",
            e.code(),
            error,
            ErrorReport::from_error(e).to_json()
        ),
        None => format!("error: {:#}", error),
    }
}

/// Byte range of 1-based `row` in `text`
fn row_span(text: &str, row: usize) -> Option<Range<usize>> {
    let mut start = 0;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        if index + 1 == row {
            let end = start + line.trim_end_matches(['\r', '\n']).len();
            return Some(start..end.max(start + 1).min(text.len()));
        }
        start += line.len();
    }
    None
}

/// Draw `error` against `text` when its context names a row
pub fn render_row_error(name: &str, text: &str, error: &dyn Reportable) -> Option<String> {
    let row = error.context().get("row")?.as_u64()? as usize;
    let span = row_span(text, row)?;
    let mut buffer = Vec::new();
    Report::build(ReportKind::Error, name, span.start)
        .with_config(ariadne::Config::default().with_color(false))
        .with_code(error.code())
        .with_message(error.to_string())
        .with_label(
            Label::new((name, span))
                .with_message(format!("row {}", row))
                .with_color(Color::Red),
        )
        .finish()
        .write((name, Source::from(text.to_string())), &mut buffer)
        .ok()?;
    String::from_utf8(buffer).ok()
}

/// Print the row diagnostic for a manifest file to stderr
pub fn emit(path: &Path, error: &dyn Reportable) {
    let Ok(text) = fs::read_to_string(path) else {
        return;
    };
    let name = path.display().to_string();
    if let Some(report) = render_row_error(&name, &text, error) {
        eprint!("{}", report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_span() {
        let text = "model,property\nCountry,\n,code\n";
        assert_eq!(row_span(text, 1), Some(0..14));
        assert_eq!(&text[row_span(text, 3).unwrap()], ",code");
        assert_eq!(row_span(text, 9), None);
    }

    #[test]
    fn test_exit_codes_follow_error_codes() {
        let error = anyhow::Error::new(BackendError::TableNotFound("x".into()));
        assert_eq!(error_code(&error), Some(ErrorCode::BackendError));
        assert_eq!(exit_code(&error), 2);

        let error = anyhow::anyhow!("plain failure");
        assert_eq!(exit_code(&error), 1);
    }
}
