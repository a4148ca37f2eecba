use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use log::{error, info};
use serde::Deserialize;

use super::DocumentReadError;

/// One parsed page: ordered text fragments as returned by the importer.
#[derive(Debug, Clone, Deserialize)]
pub struct PdfPage {
    pub fragments: Vec<String>,
}

/// Contract of the PDF collaborator: raw bytes in, ordered pages out.
/// Layout and positioning metadata stay on the importer's side.
pub trait PdfImporter {
    fn open(&self, bytes: &[u8]) -> Result<Vec<PdfPage>, DocumentReadError>;
}

#[derive(Debug, Deserialize)]
struct ImporterPayload {
    ok: bool,
    #[serde(default)]
    pages: Vec<PdfPage>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Runs the PDF helper as a subprocess, streaming the document through its
/// stdin and reading a JSON page listing from its stdout.
///
/// The command is `VOXLEGERE_PDF_COMMAND` when set (split shell-style),
/// otherwise `$VOXLEGERE_PYTHON_BIN $VOXLEGERE_PDF_SCRIPT` with the bundled
/// `scripts/py/pdf_extract.py` as the default script.
pub struct ScriptPdfImporter {
    program: OsString,
    args: Vec<OsString>,
}

impl ScriptPdfImporter {
    pub fn from_env() -> Self {
        if let Some(raw) = std::env::var_os("VOXLEGERE_PDF_COMMAND") {
            let raw = raw.to_string_lossy().into_owned();
            let mut parts: Vec<String> = shlex::Shlex::new(&raw).collect();
            if !parts.is_empty() {
                let program = OsString::from(parts.remove(0));
                let args = parts.into_iter().map(OsString::from).collect();
                return Self { program, args };
            }
        }

        let program =
            std::env::var_os("VOXLEGERE_PYTHON_BIN").unwrap_or_else(|| OsString::from("python"));
        let script = std::env::var_os("VOXLEGERE_PDF_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("scripts/py/pdf_extract.py"));
        Self {
            program,
            args: vec![script.into_os_string()],
        }
    }
}

impl PdfImporter for ScriptPdfImporter {
    fn open(&self, bytes: &[u8]) -> Result<Vec<PdfPage>, DocumentReadError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(DocumentReadError::ImporterSpawn)?;

        {
            let stdin = child.stdin.as_mut().ok_or_else(|| {
                DocumentReadError::ImporterSpawn(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "importer stdin unavailable",
                ))
            })?;
            stdin.write_all(bytes)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let status = output.status.code().unwrap_or_default();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("PDF importer exited with status {status}: {stderr}");
            return Err(DocumentReadError::ImporterFailed { status, stderr });
        }

        let payload: ImporterPayload =
            serde_json::from_slice(&output.stdout).map_err(DocumentReadError::MalformedPayload)?;
        if !payload.ok {
            return Err(DocumentReadError::Rejected {
                code: payload.code.unwrap_or_else(|| "PDF_PARSE_FAIL".into()),
                message: payload
                    .message
                    .unwrap_or_else(|| "PDF importer rejected the document".into()),
            });
        }

        info!("PDF importer produced {} pages", payload.pages.len());
        Ok(payload.pages)
    }
}
