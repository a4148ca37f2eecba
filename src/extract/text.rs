use super::DocumentReadError;

/// Decodes plain-text bytes verbatim; the transcript is the file content.
pub fn decode(bytes: &[u8]) -> Result<String, DocumentReadError> {
    Ok(String::from_utf8(bytes.to_vec())?)
}
