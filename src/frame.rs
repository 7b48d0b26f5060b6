//! Frames, the unit of data flowing between components.
//!
//! A frame is an opaque payload plus metadata. The runtime never inspects
//! payload bytes; it only moves frame references between ports. Once a frame
//! has been handed to a consumer it is logically immutable: a component
//! must not mutate a frame that may still be referenced upstream or by
//! sibling consumers.

use std::collections::BTreeMap;

/// Opaque frame payload. Producers and transform hooks agree on the
/// contents; the runtime does not.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// No data: a freshly pooled frame, or a frame whose producer had
    /// nothing to emit.
    #[default]
    Empty,
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b),
            Payload::Empty => None,
        }
    }
}

/// Frame metadata: a string map plus an append-only audit trail recording
/// the frame's provenance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
    audit: Vec<String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Append one human-readable line describing a processing step.
    pub fn audit_append(&mut self, line: impl Into<String>) {
        self.audit.push(line.into());
    }

    /// The full provenance trail, oldest first.
    pub fn audit(&self) -> &[String] {
        &self.audit
    }

    /// Copy another frame's metadata into this one, keeping both audit
    /// trails in order. Used when a transform derives an output frame from
    /// an input frame.
    pub fn copy_from(&mut self, src: &Metadata) {
        for (k, v) in &src.entries {
            self.entries.insert(k.clone(), v.clone());
        }
        let mut trail = src.audit.clone();
        trail.append(&mut self.audit);
        self.audit = trail;
    }
}

/// A unit of payload + metadata flowing through ports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Serial number assigned by the producing component.
    pub frame_no: i64,
    /// Type tag, e.g. "RGB" or "Y". Interpreted by transform hooks only.
    pub type_tag: String,
    pub payload: Payload,
    pub metadata: Metadata,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            frame_no: -1,
            ..Self::default()
        }
    }

    /// Reset a pooled frame for reuse, taking serial number, type tag and
    /// metadata (with audit trail) from `src`. The payload is cleared; the
    /// transform hook supplies the new one.
    pub fn initialise_from(&mut self, src: &Frame) {
        self.frame_no = src.frame_no;
        self.type_tag = src.type_tag.clone();
        self.payload = Payload::Empty;
        self.metadata = Metadata::new();
        self.metadata.copy_from(&src.metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_is_append_only_and_ordered() {
        let mut md = Metadata::new();
        md.audit_append("reader: /tmp/in.png");
        md.audit_append("flip: direction=vertical");
        assert_eq!(
            md.audit(),
            &[
                "reader: /tmp/in.png".to_string(),
                "flip: direction=vertical".to_string()
            ]
        );
    }

    #[test]
    fn test_copy_from_prepends_source_trail() {
        let mut src = Metadata::new();
        src.set("fps", "25");
        src.audit_append("source step");

        let mut dst = Metadata::new();
        dst.audit_append("local step");
        dst.copy_from(&src);

        assert_eq!(dst.get("fps"), Some("25"));
        assert_eq!(
            dst.audit(),
            &["source step".to_string(), "local step".to_string()]
        );
    }

    #[test]
    fn test_initialise_from_clears_payload() {
        let mut src = Frame::new();
        src.frame_no = 7;
        src.type_tag = "RGB".into();
        src.payload = Payload::Bytes(vec![1, 2, 3]);
        src.metadata.audit_append("made by source");

        let mut out = Frame::new();
        out.payload = Payload::Bytes(vec![9; 16]);
        out.initialise_from(&src);

        assert_eq!(out.frame_no, 7);
        assert_eq!(out.type_tag, "RGB");
        assert!(out.payload.is_empty());
        assert_eq!(out.metadata.audit(), &["made by source".to_string()]);
    }
}
