//! Rendering command results as a table, JSON, or CSV.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{DriveError, Result};
use crate::models::{format_size, FileMetadata};

/// Output format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

/// A row that can be rendered in every output format.
pub trait Record: Serialize {
    /// Column names, in order.
    fn headers() -> &'static [&'static str];

    /// Raw cell values, aligned with [`Record::headers`].
    fn cells(&self) -> Vec<String>;

    /// Cell values for the human-readable table.
    fn display_cells(&self) -> Vec<String> {
        self.cells()
    }
}

/// Render `records` in `format`.
///
/// CSV is written to `csv_path` and the returned string is a summary line.
pub fn render<R: Record>(
    records: &[R],
    format: OutputFormat,
    csv_path: Option<&Path>,
) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(records)),
        OutputFormat::Json => render_json(records),
        OutputFormat::Csv => {
            let path = csv_path.ok_or(DriveError::MissingOption("--csv-path"))?;
            write_csv(records, path)
        }
    }
}

pub fn render_table<R: Record>(records: &[R]) -> String {
    let headers = R::headers();
    let rows: Vec<Vec<String>> = records.iter().map(Record::display_cells).collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(headers.iter().copied(), &widths));
    let total = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    lines.push("-".repeat(total));
    for row in &rows {
        lines.push(format_row(row.iter().map(String::as_str), &widths));
    }
    lines.join("\n")
}

fn format_row<'a, I>(cells: I, widths: &[usize]) -> String
where
    I: Iterator<Item = &'a str>,
{
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect();
    padded.join("  ").trim_end().to_string()
}

pub fn render_json<R: Record>(records: &[R]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Write a header line plus one line per record to `path`.
pub fn write_csv<R: Record>(records: &[R], path: &Path) -> Result<String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(R::headers())?;
    for record in records {
        writer.write_record(record.cells())?;
    }
    writer.flush()?;

    Ok(format!("Wrote {} row(s) to {}", records.len(), path.display()))
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(T::to_string).unwrap_or_default()
}

impl Record for FileMetadata {
    fn headers() -> &'static [&'static str] {
        &["id", "name", "mimeType", "size", "modifiedTime", "trashed"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            opt(&self.mime_type),
            opt(&self.size),
            opt(&self.modified_time),
            opt(&self.trashed),
        ]
    }

    fn display_cells(&self) -> Vec<String> {
        let mut cells = self.cells();
        if self.is_folder() {
            cells[1].push('/');
        }
        cells[3] = self
            .size
            .map(format_size)
            .unwrap_or_else(|| "-".to_string());
        cells
    }
}

/// Result row for a completed upload.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct UploadedFile(pub FileMetadata);

impl Record for UploadedFile {
    fn headers() -> &'static [&'static str] {
        &["id", "name", "mimeType", "size", "webViewLink"]
    }

    fn cells(&self) -> Vec<String> {
        let file = &self.0;
        vec![
            file.id.clone(),
            file.name.clone(),
            opt(&file.mime_type),
            opt(&file.size),
            opt(&file.web_view_link),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, name: &str, size: Option<u64>) -> FileMetadata {
        FileMetadata {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: Some("text/plain".to_string()),
            web_view_link: None,
            size,
            modified_time: Some("2026-02-20T00:00:00Z".to_string()),
            trashed: Some(false),
        }
    }

    #[test]
    fn test_render_table() {
        let text = render(&[file("abc", "sample.txt", Some(2048))], OutputFormat::Table, None)
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("id"));
        assert!(lines[0].contains("modifiedTime"));
        assert!(lines[1].chars().all(|c| c == '-'));
        assert!(lines[2].contains("sample.txt"));
        assert!(lines[2].contains("2.00 KB"));
    }

    #[test]
    fn test_table_marks_folders() {
        let mut folder = file("f", "photos", None);
        folder.mime_type = Some(crate::models::FOLDER_MIME_TYPE.to_string());

        let text = render_table(&[folder.clone()]);
        assert!(text.lines().nth(2).unwrap().contains("photos/"));
        assert_eq!(folder.cells()[1], "photos");
    }

    #[test]
    fn test_render_json() {
        let text = render(&[file("abc", "x", Some(1))], OutputFormat::Json, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["name"], "x");
        assert_eq!(value[0]["mimeType"], "text/plain");
    }

    #[test]
    fn test_render_csv() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rows.csv");
        let msg = render(
            &[file("abc", "hat, red", Some(5))],
            OutputFormat::Csv,
            Some(out.as_path()),
        )
        .unwrap();

        assert!(msg.contains("Wrote 1 row(s)"));
        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "id,name,mimeType,size,modifiedTime,trashed");
        assert_eq!(
            lines[1],
            "abc,\"hat, red\",text/plain,5,2026-02-20T00:00:00Z,false"
        );
    }

    #[test]
    fn test_render_csv_requires_path() {
        let err = render(&[file("a", "x", None)], OutputFormat::Csv, None).unwrap_err();
        assert!(matches!(err, DriveError::MissingOption("--csv-path")));
    }

    #[test]
    fn test_csv_quotes_embedded_quotes_and_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("rows.csv");
        write_csv(
            &[
                file("a", "say \"hi\"", None),
                file("b", "two\nlines", None),
            ],
            &out,
        )
        .unwrap();

        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], "a,\"say \"\"hi\"\"\",text/plain,,2026-02-20T00:00:00Z,false");
        assert_eq!(lines[2], "b,\"two");
        assert_eq!(lines[3], "lines\",text/plain,,2026-02-20T00:00:00Z,false");
    }
}
