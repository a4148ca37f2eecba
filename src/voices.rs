//! Discovery of Piper voice models on disk.
//!
//! A voice is an `.onnx` model, optionally accompanied by a `<model>.onnx.json`
//! sidecar whose `language.code` field identifies the locale it speaks.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("voices directory {0} does not exist")]
    MissingDirectory(PathBuf),
    #[error("no voice model found for language '{0}'")]
    NoMatch(String),
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub id: String,
    pub language: Option<String>,
    pub model_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct VoiceMetadata {
    language: Option<LanguageMetadata>,
}

#[derive(Debug, Deserialize)]
struct LanguageMetadata {
    code: Option<String>,
}

/// Scans a directory tree for voice models, sorted by id for stable picks.
pub fn discover(base_dir: &Path) -> Result<Vec<Voice>, VoiceError> {
    if !base_dir.exists() {
        return Err(VoiceError::MissingDirectory(base_dir.to_path_buf()));
    }
    let mut voices = Vec::new();
    for entry in WalkDir::new(base_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("onnx") {
            continue;
        }
        let Some(id) = path.file_stem().map(|stem| stem.to_string_lossy().to_string()) else {
            continue;
        };
        voices.push(Voice {
            id,
            language: sidecar_language(path),
            model_path: path.to_path_buf(),
        });
    }
    voices.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(voices)
}

/// Picks the model for `lang`, falling back to the first discovered voice.
/// Language codes compare hyphen/underscore and case insensitively, and a
/// model id prefixed with the code (Piper's `pt_BR-faber-medium` convention)
/// also counts as a match.
pub fn default_voice(base_dir: &Path, lang: &str) -> Result<Voice, VoiceError> {
    let voices = discover(base_dir)?;
    let wanted = normalize(lang);
    if let Some(voice) = voices.iter().find(|voice| {
        voice
            .language
            .as_deref()
            .map(normalize)
            .is_some_and(|code| code == wanted)
            || normalize(&voice.id).starts_with(&wanted)
    }) {
        return Ok(voice.clone());
    }
    voices
        .into_iter()
        .next()
        .ok_or_else(|| VoiceError::NoMatch(lang.to_string()))
}

fn sidecar_language(model_path: &Path) -> Option<String> {
    let mut sidecar = model_path.to_path_buf();
    sidecar.set_extension("onnx.json");
    let contents = fs::read_to_string(&sidecar).ok()?;
    match serde_json::from_str::<VoiceMetadata>(&contents) {
        Ok(metadata) => metadata.language.and_then(|lang| lang.code),
        Err(err) => {
            log::warn!(
                "ignoring malformed voice metadata {}: {err}",
                sidecar.display()
            );
            None
        }
    }
}

fn normalize(code: &str) -> String {
    code.trim().replace('-', "_").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn missing_directory_is_an_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let error = discover(&temp.path().join("nowhere")).unwrap_err();
        assert!(matches!(error, VoiceError::MissingDirectory(_)));
    }

    #[test]
    fn discovers_models_with_sidecar_language() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("faber.onnx").touch().unwrap();
        temp.child("faber.onnx.json")
            .write_str(r#"{"language":{"code":"pt_BR"}}"#)
            .unwrap();
        let voices = discover(temp.path()).unwrap();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].id, "faber");
        assert_eq!(voices[0].language.as_deref(), Some("pt_BR"));
    }

    #[test]
    fn default_voice_matches_across_hyphen_and_case() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("english.onnx").touch().unwrap();
        temp.child("english.onnx.json")
            .write_str(r#"{"language":{"code":"en_US"}}"#)
            .unwrap();
        temp.child("faber.onnx").touch().unwrap();
        temp.child("faber.onnx.json")
            .write_str(r#"{"language":{"code":"pt_BR"}}"#)
            .unwrap();
        let voice = default_voice(temp.path(), "pt-BR").unwrap();
        assert_eq!(voice.id, "faber");
    }

    #[test]
    fn default_voice_matches_piper_id_prefixes() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("pt_BR-faber-medium.onnx").touch().unwrap();
        let voice = default_voice(temp.path(), "pt-BR").unwrap();
        assert_eq!(voice.id, "pt_BR-faber-medium");
    }

    #[test]
    fn default_voice_falls_back_to_the_first_model() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("zz.onnx").touch().unwrap();
        temp.child("aa.onnx").touch().unwrap();
        let voice = default_voice(temp.path(), "pt-BR").unwrap();
        assert_eq!(voice.id, "aa");
    }

    #[test]
    fn empty_directory_yields_no_match() {
        let temp = assert_fs::TempDir::new().unwrap();
        let error = default_voice(temp.path(), "pt-BR").unwrap_err();
        assert!(matches!(error, VoiceError::NoMatch(_)));
    }

    #[test]
    fn malformed_sidecar_is_ignored() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("faber.onnx").touch().unwrap();
        temp.child("faber.onnx.json").write_str("not json").unwrap();
        let voices = discover(temp.path()).unwrap();
        assert_eq!(voices[0].language, None);
    }
}
