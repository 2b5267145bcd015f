use serde::Serialize;

/// MIME type Drive assigns to native Google Docs.
pub const GOOGLE_DOC_MIME_TYPE: &str = "application/vnd.google-apps.document";

/// Index of the first character in a document body.
pub const BODY_START_INDEX: i64 = 1;

/// A Google Doc as returned by the Drive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub name: String,
    pub web_url: Option<String>,
}

/// The part of a fetched document needed to append to it: the `endIndex` of each
/// structural element of the body, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentOutline {
    pub element_end_indexes: Vec<Option<i64>>,
}

impl DocumentOutline {
    /// Where appended text goes: the end of the last structural element, or the start
    /// of the body when the body is empty or the last element carries no index.
    pub fn append_index(&self) -> i64 {
        self.element_end_indexes
            .last()
            .copied()
            .flatten()
            .unwrap_or(BODY_START_INDEX)
    }
}

/// A single text insertion, serialized as a Docs API `insertText` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEdit {
    pub index: i64,
    pub text: String,
}

impl DocumentEdit {
    pub fn insert_text(index: i64, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertTextRequest<'a> {
    insert_text: InsertText<'a>,
}

#[derive(Serialize)]
struct InsertText<'a> {
    location: Location,
    text: &'a str,
}

#[derive(Serialize)]
struct Location {
    index: i64,
}

impl Serialize for DocumentEdit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        InsertTextRequest {
            insert_text: InsertText {
                location: Location { index: self.index },
                text: &self.text,
            },
        }
        .serialize(serializer)
    }
}

/// Whether the upsert created the document or appended to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Appended,
}

/// Result of a successful upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedDocument {
    pub document_id: String,
    pub url: String,
    pub outcome: UpsertOutcome,
}

/// Viewer URL for a document id on the given Docs host.
pub fn document_url(host: &str, document_id: &str) -> String {
    format!("https://{}/document/d/{}/edit", host, document_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_index_uses_last_element_end() {
        let outline = DocumentOutline {
            element_end_indexes: vec![Some(1), Some(12), Some(40)],
        };
        assert_eq!(outline.append_index(), 40);
    }

    #[test]
    fn append_index_defaults_to_body_start() {
        assert_eq!(DocumentOutline::default().append_index(), 1);

        let malformed = DocumentOutline {
            element_end_indexes: vec![Some(12), None],
        };
        assert_eq!(malformed.append_index(), 1);
    }

    #[test]
    fn edit_serializes_as_insert_text_request() {
        let edit = DocumentEdit::insert_text(7, "\nworld");
        assert_eq!(
            serde_json::to_value(&edit).unwrap(),
            serde_json::json!({
                "insertText": { "location": { "index": 7 }, "text": "\nworld" }
            })
        );
    }

    #[test]
    fn builds_edit_url() {
        assert_eq!(
            document_url("docs.google.com", "abc"),
            "https://docs.google.com/document/d/abc/edit"
        );
    }
}
