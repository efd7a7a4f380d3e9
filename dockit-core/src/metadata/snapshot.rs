//! Immutable metadata records and their CBOR encoding.
//!
//! A [`Snapshot`] is encoded as a CBOR map with text keys. `provisioned` is
//! always written; every optional field is omitted when absent, so an absent
//! field and a present-but-empty one decode back to different values.
//!
//! ```text
//! {
//!   "provisioned":     bool,
//!   "displayName":     tstr,   ; optional
//!   "typeDisplayName": tstr,   ; optional
//!   "cardArt":         bstr,   ; optional, PNG
//!   "issuerLogo":      bstr,   ; optional, PNG
//!   "other":           bstr,   ; optional, application data
//! }
//! ```

use std::fmt;

use ciborium::value::Value;

use crate::error::{MetadataError, MetadataResult};

const KEY_PROVISIONED: &str = "provisioned";
const KEY_DISPLAY_NAME: &str = "displayName";
const KEY_TYPE_DISPLAY_NAME: &str = "typeDisplayName";
const KEY_CARD_ART: &str = "cardArt";
const KEY_ISSUER_LOGO: &str = "issuerLogo";
const KEY_OTHER: &str = "other";

/// Point-in-time state of a document's user-facing metadata.
///
/// Snapshots are never edited in place; [`Snapshot::provisioned`] and
/// [`Snapshot::with_fields`] build new values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Whether the issuer has completed provisioning of the document.
    pub provisioned: bool,
    /// User-facing name of this document, e.g. "John's Passport".
    pub display_name: Option<String>,
    /// User-facing name of the document type, e.g. "Utopia Passport".
    pub type_display_name: Option<String>,
    /// Card artwork, PNG. An aspect ratio of 1.586 (ID-1, ISO/IEC 7810) is
    /// expected and transparency is supported.
    pub card_art: Option<Vec<u8>>,
    /// Issuer logo, PNG. A square aspect ratio is preferred.
    pub issuer_logo: Option<Vec<u8>>,
    /// Opaque application data.
    pub other: Option<Vec<u8>>,
}

impl Snapshot {
    /// Returns a copy of this snapshot with `provisioned` set.
    #[must_use]
    pub fn provisioned(&self) -> Self {
        Self {
            provisioned: true,
            ..self.clone()
        }
    }

    /// Returns a snapshot carrying exactly the given user-facing fields and
    /// this snapshot's provisioning state.
    #[must_use]
    pub const fn with_fields(
        &self,
        display_name: Option<String>,
        type_display_name: Option<String>,
        card_art: Option<Vec<u8>>,
        issuer_logo: Option<Vec<u8>>,
        other: Option<Vec<u8>>,
    ) -> Self {
        Self {
            provisioned: self.provisioned,
            display_name,
            type_display_name,
            card_art,
            issuer_logo,
            other,
        }
    }

    /// Encodes the snapshot as a CBOR map.
    ///
    /// Encoding is deterministic: equal snapshots produce identical bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Encoding`] if the serializer rejects the
    /// record.
    pub fn encode(&self) -> MetadataResult<Vec<u8>> {
        encode_map(self.to_cbor_entries())
    }

    /// Decodes previously persisted bytes.
    ///
    /// `None` (brand-new document) and an empty slice (document known to the
    /// store whose metadata was never written) both yield the default
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::MalformedData`] if non-empty bytes are not a
    /// valid record.
    pub fn decode(data: Option<&[u8]>) -> MetadataResult<Self> {
        match data {
            None | Some([]) => Ok(Self::default()),
            Some(bytes) => Self::from_cbor_entries(&decode_map(bytes)?),
        }
    }

    /// Map entries for this snapshot, in canonical key order.
    pub(crate) fn to_cbor_entries(&self) -> Vec<(Value, Value)> {
        let mut entries = vec![(
            Value::Text(KEY_PROVISIONED.to_string()),
            Value::Bool(self.provisioned),
        )];
        push_text(&mut entries, KEY_DISPLAY_NAME, self.display_name.as_ref());
        push_text(
            &mut entries,
            KEY_TYPE_DISPLAY_NAME,
            self.type_display_name.as_ref(),
        );
        push_bytes(&mut entries, KEY_CARD_ART, self.card_art.as_ref());
        push_bytes(&mut entries, KEY_ISSUER_LOGO, self.issuer_logo.as_ref());
        push_bytes(&mut entries, KEY_OTHER, self.other.as_ref());
        entries
    }

    /// Reads a snapshot out of decoded map entries. Unknown keys are ignored.
    pub(crate) fn from_cbor_entries(map: &[(Value, Value)]) -> MetadataResult<Self> {
        let provisioned = match cbor_get(map, KEY_PROVISIONED)? {
            None => false,
            Some(Value::Bool(value)) => *value,
            Some(_) => return Err(wrong_type(KEY_PROVISIONED, "bool")),
        };
        Ok(Self {
            provisioned,
            display_name: cbor_text(map, KEY_DISPLAY_NAME)?,
            type_display_name: cbor_text(map, KEY_TYPE_DISPLAY_NAME)?,
            card_art: cbor_bytes(map, KEY_CARD_ART)?,
            issuer_logo: cbor_bytes(map, KEY_ISSUER_LOGO)?,
            other: cbor_bytes(map, KEY_OTHER)?,
        })
    }
}

impl fmt::Debug for Snapshot {
    // Artwork can be hundreds of kilobytes, so only lengths are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("provisioned", &self.provisioned)
            .field("display_name", &self.display_name)
            .field("type_display_name", &self.type_display_name)
            .field("card_art", &self.card_art.as_ref().map(Vec::len))
            .field("issuer_logo", &self.issuer_logo.as_ref().map(Vec::len))
            .field("other", &self.other.as_ref().map(Vec::len))
            .finish()
    }
}

// CBOR helpers

pub(crate) fn encode_value(value: &Value) -> MetadataResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|err| MetadataError::Encoding(err.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode_value(bytes: &[u8]) -> MetadataResult<Value> {
    let mut reader = bytes;
    let value: Value = ciborium::de::from_reader(&mut reader)
        .map_err(|err| MetadataError::malformed(err.to_string()))?;
    if !reader.is_empty() {
        return Err(MetadataError::malformed(format!(
            "{} trailing bytes after record",
            reader.len()
        )));
    }
    Ok(value)
}

pub(crate) fn encode_map(entries: Vec<(Value, Value)>) -> MetadataResult<Vec<u8>> {
    encode_value(&Value::Map(entries))
}

pub(crate) fn decode_map(bytes: &[u8]) -> MetadataResult<Vec<(Value, Value)>> {
    match decode_value(bytes)? {
        Value::Map(map) => Ok(map),
        _ => Err(MetadataError::malformed("expected map")),
    }
}

pub(crate) fn cbor_get<'a>(
    map: &'a [(Value, Value)],
    key: &str,
) -> MetadataResult<Option<&'a Value>> {
    let mut found = map
        .iter()
        .filter(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v);
    let first = found.next();
    if found.next().is_some() {
        return Err(MetadataError::malformed(format!("duplicate key '{key}'")));
    }
    Ok(first)
}

fn cbor_text(map: &[(Value, Value)], key: &str) -> MetadataResult<Option<String>> {
    match cbor_get(map, key)? {
        None => Ok(None),
        Some(Value::Text(text)) => Ok(Some(text.clone())),
        Some(_) => Err(wrong_type(key, "text")),
    }
}

fn cbor_bytes(map: &[(Value, Value)], key: &str) -> MetadataResult<Option<Vec<u8>>> {
    match cbor_get(map, key)? {
        None => Ok(None),
        Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
        Some(_) => Err(wrong_type(key, "bytes")),
    }
}

fn push_text(entries: &mut Vec<(Value, Value)>, key: &str, value: Option<&String>) {
    if let Some(text) = value {
        entries.push((Value::Text(key.to_string()), Value::Text(text.clone())));
    }
}

fn push_bytes(entries: &mut Vec<(Value, Value)>, key: &str, value: Option<&Vec<u8>>) {
    if let Some(bytes) = value {
        entries.push((Value::Text(key.to_string()), Value::Bytes(bytes.clone())));
    }
}

pub(crate) fn wrong_type(key: &str, expected: &str) -> MetadataError {
    MetadataError::malformed(format!("field '{key}' is not {expected}"))
}
