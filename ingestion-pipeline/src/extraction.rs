use std::path::Path;

use common::error::AppError;
use tracing::debug;

/// Raw text of a document on disk. PDFs go through `pdf-extract`; anything
/// else is read as UTF-8 text.
pub async fn extract_text_from_path(path: &Path) -> Result<String, AppError> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        let bytes = tokio::fs::read(path).await?;
        extract_pdf_text(bytes).await
    } else {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

/// Runs `pdf-extract` on the PDF bytes off the async executor.
pub async fn extract_pdf_text(pdf_bytes: Vec<u8>) -> Result<String, AppError> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&pdf_bytes))
        .await?
        .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err}")))?;

    debug!(chars = text.len(), "extracted PDF text layer");
    Ok(text)
}

/// Document identifier stored with each chunk: the file name without its
/// directory.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
