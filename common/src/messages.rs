// Common Crate - messages.rs
// common/src/messages.rs
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Form field carrying the aliased purpose (`alias.token`)
pub const PURPOSE_FIELD: &str = "PURPOSE";
/// Form field carrying the challenge secret
pub const CSRF_FIELD: &str = "CSRF";
/// Form field carrying the upload manifest
pub const FILES_FIELD: &str = "FILES";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("fragment data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One chunk of a file sent out of band from its declaring form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFragment {
    pub file_id: String,
    pub part_index: u32,
    pub data: Vec<u8>,
}

#[derive(Deserialize)]
struct RawFragment {
    #[serde(rename = "FILEID")]
    file_id: String,
    #[serde(rename = "CURRENT")]
    current: u32,
    #[serde(rename = "DATA")]
    data: String,
}

/// Frames a client may send after the handshake
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Fragment(FileFragment),
    Form(Map<String, Value>),
}

impl InboundFrame {
    /// Classify a text frame; fragments are marked with `ISFILE: true`
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(FrameError::NotAnObject);
        };

        if map.get("ISFILE") == Some(&Value::Bool(true)) {
            let raw: RawFragment = serde_json::from_value(Value::Object(map))?;
            let data = STANDARD.decode(raw.data.as_bytes())?;
            return Ok(InboundFrame::Fragment(FileFragment {
                file_id: raw.file_id,
                part_index: raw.current,
                data,
            }));
        }

        Ok(InboundFrame::Form(map))
    }
}

/// A file announced in a form's upload manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredFile {
    #[serde(rename = "FILEID")]
    pub file_id: String,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "SIZE")]
    pub size: u64,
    #[serde(rename = "MIME", default)]
    pub mime_type: String,
    #[serde(rename = "MAXPART")]
    pub max_part_index: u32,
}

/// Read the upload manifest (form field name to declared files), which browsers may send
/// either as an object or as a JSON string
pub fn parse_manifest(value: Value) -> Result<Vec<(String, Vec<DeclaredFile>)>, FrameError> {
    let value = match value {
        Value::String(encoded) => serde_json::from_str(&encoded)?,
        other => other,
    };
    let Value::Object(manifest) = value else {
        return Err(FrameError::NotAnObject);
    };

    manifest
        .into_iter()
        .map(|(field, files)| {
            let files: Vec<DeclaredFile> = serde_json::from_value(files)?;
            Ok((field, files))
        })
        .collect()
}

/// Client-side DOM mutations understood by the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Update,
    Replace,
    Remove,
}

impl StreamAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamAction::Update => "update",
            StreamAction::Replace => "replace",
            StreamAction::Remove => "remove",
        }
    }
}

/// Render a push as a turbo-stream element
pub fn render_stream(action: StreamAction, target: &str, content: &str) -> String {
    match action {
        StreamAction::Remove => format!(
            r#"<turbo-stream action="remove" target="{}"></turbo-stream>"#,
            target
        ),
        _ => format!(
            r#"<turbo-stream action="{}" target="{}"><template>{}</template></turbo-stream>"#,
            action.as_str(),
            target,
            content
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_form_frame() {
        let frame = InboundFrame::parse(r#"{"PURPOSE":"a.b","CSRF":"c","username":"bob"}"#).unwrap();
        match frame {
            InboundFrame::Form(map) => {
                assert_eq!(map.get("username"), Some(&json!("bob")));
                assert_eq!(map.len(), 3);
            }
            other => panic!("expected form, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fragment_frame() {
        let text = json!({"ISFILE": true, "FILEID": "f1", "CURRENT": 3, "DATA": STANDARD.encode(b"abc")}).to_string();
        let frame = InboundFrame::parse(&text).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Fragment(FileFragment {
                file_id: "f1".to_string(),
                part_index: 3,
                data: b"abc".to_vec(),
            })
        );
    }

    #[test]
    fn test_isfile_false_is_a_form() {
        let frame = InboundFrame::parse(r#"{"ISFILE":false,"x":"1"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Form(_)));
    }

    #[test]
    fn test_rejects_non_objects_and_bad_data() {
        assert!(matches!(InboundFrame::parse("[1,2]"), Err(FrameError::NotAnObject)));
        assert!(matches!(InboundFrame::parse("nope"), Err(FrameError::Json(_))));
        let bad = r#"{"ISFILE":true,"FILEID":"f","CURRENT":0,"DATA":"***"}"#;
        assert!(matches!(InboundFrame::parse(bad), Err(FrameError::Base64(_))));
    }

    #[test]
    fn test_manifest_accepts_object_or_string() {
        let files = json!({"avatar": [{"FILEID": "f1", "NAME": "a.png", "SIZE": 10, "MIME": "image/png", "MAXPART": 1}]});
        let from_object = parse_manifest(files.clone()).unwrap();
        let from_string = parse_manifest(Value::String(files.to_string())).unwrap();
        assert_eq!(from_object, from_string);
        assert_eq!(from_object[0].0, "avatar");
        assert_eq!(from_object[0].1[0].max_part_index, 1);
    }

    #[test]
    fn test_render_stream() {
        assert_eq!(
            render_stream(StreamAction::Update, "mainDiv", "hi"),
            r#"<turbo-stream action="update" target="mainDiv"><template>hi</template></turbo-stream>"#
        );
        assert_eq!(
            render_stream(StreamAction::Remove, "x", "ignored"),
            r#"<turbo-stream action="remove" target="x"></turbo-stream>"#
        );
    }
}
