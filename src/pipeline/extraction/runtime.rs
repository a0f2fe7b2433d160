//! Process-wide PDFium runtime.
//!
//! The PDFium shared library is located and verified once, before the first
//! rasterization, and never reconfigured afterwards. The upstream `Pdfium`
//! handle is `!Send`, so each operation binds a fresh handle from the
//! resolved location; the OS caches `dlopen`/`LoadLibrary`, so repeat binds
//! are near-free.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::*;
use tracing::{debug, info};

use super::ExtractionError;
use crate::config::ENV_PDFIUM_LIB_PATH;

static PDF_RUNTIME: OnceLock<PdfRuntime> = OnceLock::new();

/// Where the PDFium library was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// A concrete library file.
    Path(PathBuf),
    /// The system library search paths.
    System,
}

#[derive(Debug)]
pub struct PdfRuntime {
    source: LibrarySource,
}

impl PdfRuntime {
    pub fn source(&self) -> &LibrarySource {
        &self.source
    }

    /// Bind a `Pdfium` handle for the current operation.
    pub fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let bindings = match &self.source {
            LibrarySource::Path(path) => {
                Pdfium::bind_to_library(path.to_string_lossy().as_ref()).map_err(|e| {
                    ExtractionError::RuntimeUnavailable(format!(
                        "Failed to load PDFium from {}: {e}",
                        path.display()
                    ))
                })?
            }
            LibrarySource::System => Pdfium::bind_to_system_library().map_err(|e| {
                ExtractionError::RuntimeUnavailable(format!("System PDFium not loadable: {e}"))
            })?,
        };
        Ok(Pdfium::new(bindings))
    }
}

/// Initialize the runtime once. Later calls return the existing runtime and
/// ignore `library_path`.
///
/// Discovery order:
/// 1. `library_path` argument
/// 2. `PDFIUM_DYNAMIC_LIB_PATH` env var
/// 3. Alongside the running executable (and `./lib`, `../lib` next to it)
/// 4. System library search paths
pub fn init_pdf_runtime(library_path: Option<&Path>) -> Result<&'static PdfRuntime, ExtractionError> {
    if let Some(runtime) = PDF_RUNTIME.get() {
        debug!("PDF runtime already initialized");
        return Ok(runtime);
    }

    let source = discover_library(library_path)?;
    info!(source = ?source, "PDF runtime initialized");
    Ok(PDF_RUNTIME.get_or_init(|| PdfRuntime { source }))
}

/// The initialized runtime, or `RuntimeNotInitialized`.
pub fn pdf_runtime() -> Result<&'static PdfRuntime, ExtractionError> {
    PDF_RUNTIME.get().ok_or(ExtractionError::RuntimeNotInitialized)
}

fn discover_library(explicit: Option<&Path>) -> Result<LibrarySource, ExtractionError> {
    let env_path = std::env::var(ENV_PDFIUM_LIB_PATH).ok().map(PathBuf::from);

    if let Some(path) = explicit.map(Path::to_path_buf).or(env_path) {
        debug!(path = %path.display(), "Loading PDFium from configured path");
        Pdfium::bind_to_library(path.to_string_lossy().as_ref()).map_err(|e| {
            ExtractionError::RuntimeUnavailable(format!(
                "Failed to load PDFium from {}: {e}",
                path.display()
            ))
        })?;
        return Ok(LibrarySource::Path(path));
    }

    for dir in candidate_dirs() {
        let lib_path =
            Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
        if Pdfium::bind_to_library(&lib_path).is_ok() {
            debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
            return Ok(LibrarySource::Path(PathBuf::from(lib_path)));
        }
    }

    Pdfium::bind_to_system_library().map_err(|e| {
        ExtractionError::RuntimeUnavailable(format!(
            "PDFium library not found. Set {ENV_PDFIUM_LIB_PATH} or install PDFium: {e}"
        ))
    })?;
    Ok(LibrarySource::System)
}

/// Directories searched relative to the running executable.
fn candidate_dirs() -> Vec<PathBuf> {
    let Ok(exe) = std::env::current_exe() else {
        return Vec::new();
    };
    let Some(exe_dir) = exe.parent() else {
        return Vec::new();
    };
    vec![
        exe_dir.to_path_buf(),
        exe_dir.join("lib"),
        exe_dir.join("..").join("lib"),
    ]
}
