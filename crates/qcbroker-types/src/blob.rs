//! Blob — opaque, content-addressed large payloads (stdout/stderr/error,
//! wavefunctions, native files). Always addressed by integer id: never embedded inline in a record's JSON body.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-types", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx-types", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Json,
    Binary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    pub id: i64,
    pub content_type: ContentType,
    pub compressed: bool,
    pub size_bytes: u64,
}

/// A blob transferred as JSON with base64-encoded bytes. The binary side
/// channel carries the same `content_type` +
/// `data` pair out-of-band; this type is the canonical schema for both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobPayload {
    pub content_type: ContentType,
    #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
    pub data: Vec<u8>,
}

fn to_base64<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    BASE64.encode(bytes).serialize(s)
}

fn from_base64<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(d)?;
    BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_payload_round_trips_through_json() {
        let payload = BlobPayload {
            content_type: ContentType::Text,
            data: b"scf energy = -1.0\n".to_vec(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: BlobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, payload.data);
    }
}
