//! Static source index to camera identity lookup.

use crate::config::CameraEntry;
use crate::types::CameraId;
use std::collections::BTreeMap;

/// Marker the upstream pipeline embeds in per-source element names.
const SOURCE_ELEMENT_PREFIX: &str = "uri-decode-bin-";

/// Immutable index → [`CameraId`] table, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct CameraRegistry {
    cameras: BTreeMap<u32, CameraId>,
}

impl CameraRegistry {
    /// Build the registry from the configured camera table.
    pub fn from_entries(entries: &[CameraEntry]) -> Self {
        let cameras = entries
            .iter()
            .map(|entry| (entry.index, CameraId::new(entry.name.clone())))
            .collect();

        Self { cameras }
    }

    /// Resolve a source index. Unknown indices map to `UNKNOWN_CAM_<index>`.
    pub fn resolve(&self, index: u32) -> CameraId {
        self.cameras
            .get(&index)
            .cloned()
            .unwrap_or_else(|| CameraId::new(format!("UNKNOWN_CAM_{}", index)))
    }

    /// Whether the index is part of the configured table.
    pub fn is_known(&self, index: u32) -> bool {
        self.cameras.contains_key(&index)
    }

    /// Configured cameras in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &CameraId)> {
        self.cameras.iter().map(|(index, id)| (*index, id))
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

/// Extract the source index from an upstream error context such as
/// `"/GstPipeline:pipeline0/GstURIDecodeBin:uri-decode-bin-2/GstRTSPSrc:source"`.
pub fn parse_source_index(context: &str) -> Option<u32> {
    let start = context.find(SOURCE_ELEMENT_PREFIX)? + SOURCE_ELEMENT_PREFIX.len();
    let digits: String = context[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CameraRegistry {
        CameraRegistry::from_entries(&[
            CameraEntry {
                index: 0,
                name: "RECEPTION_AREA".to_string(),
            },
            CameraEntry {
                index: 2,
                name: "BOSS_CABIN".to_string(),
            },
        ])
    }

    #[test]
    fn test_resolve_known() {
        let registry = registry();
        assert_eq!(registry.resolve(2).as_str(), "BOSS_CABIN");
        assert!(registry.is_known(0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_is_deterministic() {
        let registry = registry();
        assert_eq!(registry.resolve(7).as_str(), "UNKNOWN_CAM_7");
        assert_eq!(registry.resolve(7), registry.resolve(7));
        assert!(!registry.is_known(7));
    }

    #[test]
    fn test_parse_source_index() {
        assert_eq!(
            parse_source_index("source /GstPipeline:pipeline0/GstURIDecodeBin:uri-decode-bin-2/GstRTSPSrc:source"),
            Some(2)
        );
        assert_eq!(parse_source_index("uri-decode-bin-13"), Some(13));
        assert_eq!(parse_source_index("nvstreammux0 internal error"), None);
        assert_eq!(parse_source_index("uri-decode-bin-"), None);
    }
}
