use crate::protocol::JsonObject;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const SLA_PREFIX: &str = "gamma_import_";
const SLA_SUFFIX: &str = ".sla";
const SLA_FIELD: &str = "sla_xml_bytes";

#[derive(Debug, Error)]
pub enum SlaError {
    #[error("SLA XML is empty")]
    Empty,
    #[error("Could not create temp file: {0}")]
    Io(#[from] std::io::Error),
    #[error("import result has no sla_xml_bytes field")]
    Missing,
    #[error("sla_xml_bytes is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSla {
    pub path: PathBuf,
}

impl SavedSla {
    pub fn message(&self) -> String {
        format!(
            "SLA saved to: {} (manual import required)",
            self.path.display()
        )
    }
}

/// Writes the page XML to a fresh file in the system temp dir. The file outlives the process.
pub fn save_temp_sla(xml: &[u8]) -> Result<SavedSla, SlaError> {
    save_sla_in(&std::env::temp_dir(), xml)
}

pub fn save_sla_in(dir: &Path, xml: &[u8]) -> Result<SavedSla, SlaError> {
    if xml.is_empty() {
        return Err(SlaError::Empty);
    }
    let mut file = tempfile::Builder::new()
        .prefix(SLA_PREFIX)
        .suffix(SLA_SUFFIX)
        .rand_bytes(6)
        .tempfile_in(dir)?;
    file.write_all(xml)?;
    file.flush()?;
    let (_, path) = file.keep().map_err(|e| e.error)?;

    info!(path = %path.display(), bytes = xml.len(), "saved sla");
    Ok(SavedSla { path })
}

/// Page XML carried hex-encoded in a Figma frame import result.
pub fn sla_from_import(result: &JsonObject) -> Result<Vec<u8>, SlaError> {
    let encoded = result
        .get(SLA_FIELD)
        .and_then(Value::as_str)
        .ok_or(SlaError::Missing)?;
    Ok(hex::decode(encoded.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn saves_kept_file_with_expected_name() {
        let dir = tempfile::tempdir().unwrap();
        let saved = save_sla_in(dir.path(), b"<SCRIBUSUTF8NEW/>").unwrap();

        let name = saved.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("gamma_import_"), "{name}");
        assert!(name.ends_with(".sla"), "{name}");
        assert_eq!(name.len(), "gamma_import_".len() + 6 + ".sla".len());
        assert_eq!(std::fs::read(&saved.path).unwrap(), b"<SCRIBUSUTF8NEW/>");
        assert_eq!(
            saved.message(),
            format!("SLA saved to: {} (manual import required)", saved.path.display())
        );
    }

    #[test]
    fn empty_xml_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(save_sla_in(dir.path(), b""), Err(SlaError::Empty)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_dir_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert!(matches!(save_sla_in(&gone, b"<x/>"), Err(SlaError::Io(_))));
    }

    #[test]
    fn decodes_hex_payload() {
        let result = json!({"sla_xml_bytes": hex::encode("<DOCUMENT/>"), "frame_id": "1:2"});
        let xml = sla_from_import(result.as_object().unwrap()).unwrap();
        assert_eq!(xml, b"<DOCUMENT/>");

        let bad = json!({"sla_xml_bytes": "zz"});
        assert!(matches!(
            sla_from_import(bad.as_object().unwrap()),
            Err(SlaError::Hex(_))
        ));
        assert!(matches!(
            sla_from_import(&JsonObject::new()),
            Err(SlaError::Missing)
        ));
    }
}
