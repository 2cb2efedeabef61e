use calamine::{Data, Reader, open_workbook_auto};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const CSV_MIME: &str = "text/csv";

/// Extensions the workbook reader understands.
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("could not read spreadsheet: {0}")]
    Read(#[from] calamine::Error),

    #[error("spreadsheet contains no worksheets")]
    NoWorksheet,

    #[error("could not write CSV: {0}")]
    Write(#[from] csv::Error),

    #[error("I/O error during conversion: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversion task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("staged file disappeared during conversion")]
    Abandoned,
}

/// A converted file living next to the staged upload. Removed on drop.
#[derive(Debug)]
pub struct DerivedArtifact {
    path: Option<PathBuf>,
}

impl DerivedArtifact {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn remove(mut self) {
        if let Some(path) = self.path.take() {
            remove_quietly(&path);
        }
    }
}

impl Drop for DerivedArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove_quietly(&path);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temporary file {}: {}", path.display(), e),
    }
}

/// The file that should be forwarded to the AI service.
#[derive(Debug)]
pub struct Normalized {
    pub path: PathBuf,
    pub mime_type: String,
    /// Set when `path` is a derived file distinct from the staged upload.
    /// Whoever holds it owns the file.
    pub artifact: Option<DerivedArtifact>,
}

impl Normalized {
    pub fn converted(&self) -> bool {
        self.artifact.is_some()
    }
}

pub fn is_spreadsheet(extension: &str) -> bool {
    let extension = extension.trim_start_matches('.');
    SPREADSHEET_EXTENSIONS
        .iter()
        .any(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Converts spreadsheets to a sibling CSV file; anything else passes through.
pub fn normalize(
    path: &Path,
    extension: &str,
    declared_mime: &str,
) -> Result<Normalized, NormalizeError> {
    if !is_spreadsheet(extension) {
        return Ok(Normalized {
            path: path.to_path_buf(),
            mime_type: declared_mime.to_string(),
            artifact: None,
        });
    }

    // An existing file belongs to another request
    let output = path.with_extension("csv");
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&output)?;
    let artifact = DerivedArtifact::new(output.clone());
    convert_to_csv(path, file)?;

    Ok(Normalized {
        path: output,
        mime_type: CSV_MIME.to_string(),
        artifact: Some(artifact),
    })
}

/// Same as [`normalize`], but spreadsheet parsing runs on the blocking pool.
///
/// If the caller stops waiting, the task's output is dropped with it and
/// the derived file goes away.
pub async fn normalize_off_thread(
    path: PathBuf,
    extension: String,
    declared_mime: String,
) -> Result<Normalized, NormalizeError> {
    if !is_spreadsheet(&extension) {
        return normalize(&path, &extension, &declared_mime);
    }

    tokio::task::spawn_blocking(move || {
        let normalized = normalize(&path, &extension, &declared_mime)?;
        // Staged file already cleaned up; dropping `normalized` removes ours
        if !path.exists() {
            return Err(NormalizeError::Abandoned);
        }
        Ok(normalized)
    })
    .await?
}

/// Writes the first worksheet of `source` as CSV to `output` and returns the row count.
pub fn convert_to_csv<W: Write>(source: &Path, output: W) -> Result<usize, NormalizeError> {
    let mut workbook = open_workbook_auto(source)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(NormalizeError::NoWorksheet)??;

    let mut writer = csv::Writer::from_writer(output);
    for row in range.rows() {
        writer.write_record(row.iter().map(render_cell))?;
    }
    writer.flush()?;

    debug!(
        "Converted {} rows x {} columns from {}",
        range.height(),
        range.width(),
        source.display()
    );
    Ok(range.height())
}

fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => render_float(*f),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| render_float(dt.as_f64())),
        Data::Error(e) => e.to_string(),
    }
}

/// Whole numbers are written without a trailing `.0`.
fn render_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}
