//! # Queue Envelope
//!
//! The typed unit of work exchanged over the broker. On the wire an envelope
//! is a JSON object:
//!
//! ```json
//! { "type": "DOCUMENT_INDEX",
//!   "payload": { "id": 7, "url": "https://...", "year": 2021, "isNew": true },
//!   "next": 3, "isNew": true, "typeGenerate": 1 }
//! ```
//!
//! `type` selects the payload shape. In Rust the pair is fused into the
//! [`JobPayload`] sum type, so a decoded envelope can never carry a payload
//! that disagrees with its type: the decoder rejects the mismatch with a
//! `Decode` error instead.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{PipelineError, PipelineResult};

/// Discriminant selecting the processing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    /// Download a filings index file and hand it to content processing
    DocumentIndex,
    /// Execute a statement file as a raw batch
    DocumentSql,
    /// Execute a document-list statement file as a raw batch
    DocumentListSql,
    /// Run a SELECT file and upsert its rows into the document list
    DocumentListSqlSelect,
    /// Run a statement file for its side effects only
    DocumentListSqlUpdate,
    /// A single document-list record
    DocumentList,
    /// A named batch of document-list records
    DocumentCollection,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::DocumentIndex => "DOCUMENT_INDEX",
            LinkType::DocumentSql => "DOCUMENT_SQL",
            LinkType::DocumentListSql => "DOCUMENT_LIST_SQL",
            LinkType::DocumentListSqlSelect => "DOCUMENT_LIST_SQL_SELECT",
            LinkType::DocumentListSqlUpdate => "DOCUMENT_LIST_SQL_UPDATE",
            LinkType::DocumentList => "DOCUMENT_LIST",
            LinkType::DocumentCollection => "DOCUMENT_COLLECTION",
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the filings index: where to fetch it and which year it covers
///
/// Producers may send the whole index row (`status` and friends); the four
/// required fields are what identify this shape, so extra columns are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentIndexRecord {
    #[serde(deserialize_with = "deserialize_record_id")]
    pub id: i64,
    pub url: String,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
}

/// A document-list row (one filing listed in an index)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DocumentListRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cik: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_filed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Reference to a file on the consumer's filesystem
///
/// `name` and `qty` identify a chunked process and its chunk count; when
/// present, the SQL strategies report progress under `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<u32>,
}

impl FileReference {
    pub fn at_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Tag the reference as one of `qty` chunks of the named process
    pub fn with_progress(mut self, name: impl Into<String>, qty: u32) -> Self {
        self.name = Some(name.into());
        self.qty = Some(qty);
        self
    }
}

/// A named batch of document-list records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentCollection {
    pub documents: Vec<DocumentListRecord>,
    pub name: String,
    pub qty: u32,
}

/// Type-and-payload pair of an envelope
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    DocumentIndex(DocumentIndexRecord),
    DocumentSql(FileReference),
    DocumentListSql(FileReference),
    DocumentListSqlSelect(FileReference),
    DocumentListSqlUpdate(FileReference),
    DocumentList(DocumentListRecord),
    DocumentCollection(DocumentCollection),
}

impl JobPayload {
    pub fn link_type(&self) -> LinkType {
        match self {
            JobPayload::DocumentIndex(_) => LinkType::DocumentIndex,
            JobPayload::DocumentSql(_) => LinkType::DocumentSql,
            JobPayload::DocumentListSql(_) => LinkType::DocumentListSql,
            JobPayload::DocumentListSqlSelect(_) => LinkType::DocumentListSqlSelect,
            JobPayload::DocumentListSqlUpdate(_) => LinkType::DocumentListSqlUpdate,
            JobPayload::DocumentList(_) => LinkType::DocumentList,
            JobPayload::DocumentCollection(_) => LinkType::DocumentCollection,
        }
    }

    fn shape(&self) -> PayloadShape<'_> {
        match self {
            JobPayload::DocumentIndex(record) => PayloadShape::Index(record),
            JobPayload::DocumentSql(file)
            | JobPayload::DocumentListSql(file)
            | JobPayload::DocumentListSqlSelect(file)
            | JobPayload::DocumentListSqlUpdate(file) => PayloadShape::File(file),
            JobPayload::DocumentList(record) => PayloadShape::List(record),
            JobPayload::DocumentCollection(collection) => PayloadShape::Collection(collection),
        }
    }

    fn from_parts(link_type: LinkType, payload: serde_json::Value) -> PipelineResult<Self> {
        Ok(match link_type {
            LinkType::DocumentIndex => JobPayload::DocumentIndex(payload_as(link_type, payload)?),
            LinkType::DocumentSql => JobPayload::DocumentSql(payload_as(link_type, payload)?),
            LinkType::DocumentListSql => {
                JobPayload::DocumentListSql(payload_as(link_type, payload)?)
            }
            LinkType::DocumentListSqlSelect => {
                JobPayload::DocumentListSqlSelect(payload_as(link_type, payload)?)
            }
            LinkType::DocumentListSqlUpdate => {
                JobPayload::DocumentListSqlUpdate(payload_as(link_type, payload)?)
            }
            LinkType::DocumentList => JobPayload::DocumentList(payload_as(link_type, payload)?),
            LinkType::DocumentCollection => {
                JobPayload::DocumentCollection(payload_as(link_type, payload)?)
            }
        })
    }
}

fn payload_as<T: DeserializeOwned>(
    link_type: LinkType,
    payload: serde_json::Value,
) -> PipelineResult<T> {
    serde_json::from_value(payload).map_err(|e| {
        PipelineError::decode(format!("payload does not match type {link_type}: {e}"))
    })
}

/// Follow-up key chaining a subsequent envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextKey {
    Number(i64),
    Text(String),
}

/// Envelope exchanged through the broker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct QueueEnvelope {
    pub job: JobPayload,
    pub next: Option<NextKey>,
    /// Insert-path (`true`) versus update-path semantics downstream
    pub is_new: Option<bool>,
    pub type_generate: Option<i32>,
}

impl QueueEnvelope {
    pub fn new(job: JobPayload) -> Self {
        Self {
            job,
            next: None,
            is_new: None,
            type_generate: None,
        }
    }

    pub fn with_next(mut self, next: NextKey) -> Self {
        self.next = Some(next);
        self
    }

    pub fn with_is_new(mut self, is_new: bool) -> Self {
        self.is_new = Some(is_new);
        self
    }

    pub fn with_type_generate(mut self, type_generate: i32) -> Self {
        self.type_generate = Some(type_generate);
        self
    }

    pub fn link_type(&self) -> LinkType {
        self.job.link_type()
    }

    /// Serialize to the UTF-8 JSON body published on the broker
    pub fn encode(&self) -> PipelineResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| PipelineError::invalid_payload(format!("envelope encoding failed: {e}")))
    }

    /// Parse a broker body; malformed JSON, unknown types and type/payload
    /// mismatches all yield `PipelineError::Decode`
    pub fn decode(bytes: &[u8]) -> PipelineResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    link_type: LinkType,
    payload: serde_json::Value,
    #[serde(default)]
    next: Option<NextKey>,
    #[serde(default, rename = "isNew")]
    is_new: Option<bool>,
    #[serde(default, rename = "typeGenerate")]
    type_generate: Option<i32>,
}

impl TryFrom<RawEnvelope> for QueueEnvelope {
    type Error = PipelineError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            job: JobPayload::from_parts(raw.link_type, raw.payload)?,
            next: raw.next,
            is_new: raw.is_new,
            type_generate: raw.type_generate,
        })
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadShape<'a> {
    Index(&'a DocumentIndexRecord),
    File(&'a FileReference),
    List(&'a DocumentListRecord),
    Collection(&'a DocumentCollection),
}

#[derive(Serialize)]
struct RawEnvelopeRef<'a> {
    #[serde(rename = "type")]
    link_type: LinkType,
    payload: PayloadShape<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next: Option<&'a NextKey>,
    #[serde(rename = "isNew", skip_serializing_if = "Option::is_none")]
    is_new: Option<bool>,
    #[serde(rename = "typeGenerate", skip_serializing_if = "Option::is_none")]
    type_generate: Option<i32>,
}

impl Serialize for QueueEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawEnvelopeRef {
            link_type: self.link_type(),
            payload: self.job.shape(),
            next: self.next.as_ref(),
            is_new: self.is_new,
            type_generate: self.type_generate,
        }
        .serialize(serializer)
    }
}

/// Record ids arrive as numbers or as numeric strings
fn deserialize_record_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("record id is not numeric: {text:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_document_index() {
        let body = json!({
            "type": "DOCUMENT_INDEX",
            "payload": {"id": "42", "url": "https://www.sec.gov/Archives/edgar/full-index/2021/QTR1/company.idx", "year": 2021, "isNew": true},
            "next": "QTR2"
        });

        let envelope = QueueEnvelope::decode(body.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.link_type(), LinkType::DocumentIndex);
        assert_eq!(envelope.next, Some(NextKey::Text("QTR2".to_string())));
        match envelope.job {
            JobPayload::DocumentIndex(record) => {
                assert_eq!(record.id, 42);
                assert_eq!(record.year, 2021);
                assert_eq!(record.is_new, Some(true));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let envelope = QueueEnvelope::new(JobPayload::DocumentListSqlSelect(
            FileReference::at_path("/tmp/select.sql"),
        ))
        .with_is_new(false)
        .with_type_generate(2)
        .with_next(NextKey::Number(5));

        let value: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "DOCUMENT_LIST_SQL_SELECT");
        assert_eq!(value["payload"]["path"], "/tmp/select.sql");
        assert_eq!(value["isNew"], false);
        assert_eq!(value["typeGenerate"], 2);
        assert_eq!(value["next"], 5);
    }

    #[test]
    fn test_unknown_type_is_decode_error() {
        let body = br#"{"type": "DOCUMENT_ARCHIVE", "payload": {}}"#;
        let err = QueueEnvelope::decode(body).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_type_payload_mismatch_is_decode_error() {
        let body = json!({
            "type": "DOCUMENT_SQL",
            "payload": {"id": 1, "url": "https://example.test", "year": 2020}
        });
        let err = QueueEnvelope::decode(body.to_string().as_bytes()).unwrap_err();
        assert!(err.is_decode());
        assert!(err.to_string().contains("DOCUMENT_SQL"));
    }

    #[test]
    fn test_non_json_is_decode_error() {
        assert!(QueueEnvelope::decode(b"\xff\xfenot json").unwrap_err().is_decode());
        assert!(QueueEnvelope::decode(b"").unwrap_err().is_decode());
    }

    #[test]
    fn test_non_numeric_string_id_rejected() {
        let body = json!({
            "type": "DOCUMENT_INDEX",
            "payload": {"id": "abc", "url": "https://example.test", "year": 2020}
        });
        assert!(QueueEnvelope::decode(body.to_string().as_bytes()).is_err());
    }
}
