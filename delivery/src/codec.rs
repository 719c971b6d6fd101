//! Conversion between stream records and messages.
//!
//! The JSON codec wraps a message into an envelope holding its id (`watermill_message_uuid`), its
//! base64 payload and its metadata as headers. A `null` headers object decodes as empty. The partition key used for publishing is taken from the
//! [`PARTITION_KEY_KEY`] metadata entry.

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryResult, ErrorKind};
use crate::message::Message;
use crate::types::{APPROXIMATE_ARRIVAL_TIMESTAMP_KEY, PARTITION_KEY_KEY, PutRecordEntry, Record};
use crate::{bail, delivery_error};

/// Encodes messages into entries appended to a stream.
pub trait Marshaller: fmt::Debug + Send + Sync {
    fn marshal(&self, message: &Message) -> DeliveryResult<PutRecordEntry>;
}

/// Decodes stream records into messages.
pub trait Unmarshaller: fmt::Debug + Send + Sync {
    fn unmarshal(&self, record: &Record) -> DeliveryResult<Message>;
}

/// Wire representation of a message inside a record.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "watermill_message_uuid")]
    message_uuid: String,
    data: String,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
}

/// JSON envelope marshaller, the counterpart of [`JsonUnmarshaller`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshal(&self, message: &Message) -> DeliveryResult<PutRecordEntry> {
        let envelope = Envelope {
            message_uuid: message.uuid().to_owned(),
            data: STANDARD.encode(message.payload()),
            headers: Some(message.metadata().clone()),
        };

        let data = serde_json::to_vec(&envelope).map_err(|err| {
            delivery_error!(
                ErrorKind::EncodeFailed,
                "Failed to encode message envelope",
                format!("message {}", message.uuid()),
                source: err
            )
        })?;

        let partition_key = message
            .metadata_value(PARTITION_KEY_KEY)
            .unwrap_or_default()
            .to_owned();

        Ok(PutRecordEntry {
            partition_key,
            data: Bytes::from(data),
        })
    }
}

/// JSON envelope unmarshaller.
///
/// The decoded message carries the envelope headers plus the record's partition key and
/// RFC 3339 arrival timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonUnmarshaller;

impl Unmarshaller for JsonUnmarshaller {
    fn unmarshal(&self, record: &Record) -> DeliveryResult<Message> {
        let envelope: Envelope = serde_json::from_slice(&record.data).map_err(|err| {
            delivery_error!(
                ErrorKind::DecodeFailed,
                "Failed to decode message envelope",
                format!("record {}", record.sequence_number),
                source: err
            )
        })?;

        if envelope.message_uuid.is_empty() {
            bail!(
                ErrorKind::DecodeFailed,
                "Message envelope has an empty id",
                format!("record {}", record.sequence_number)
            );
        }

        let payload = STANDARD.decode(envelope.data.as_bytes()).map_err(|err| {
            delivery_error!(
                ErrorKind::DecodeFailed,
                "Failed to decode message payload",
                format!("message {}", envelope.message_uuid),
                source: err
            )
        })?;

        let mut message = Message::new(envelope.message_uuid, payload)
            .with_metadata(envelope.headers.unwrap_or_default());
        message.set_metadata(PARTITION_KEY_KEY, record.partition_key.clone());
        message.set_metadata(
            APPROXIMATE_ARRIVAL_TIMESTAMP_KEY,
            record
                .approximate_arrival_timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::types::SequenceNumber;

    fn record(data: impl Into<Bytes>) -> Record {
        Record {
            sequence_number: SequenceNumber(1),
            partition_key: "pk-1".to_owned(),
            data: data.into(),
            approximate_arrival_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn marshal_uses_partition_key_metadata() {
        let mut message = Message::new("id-1", "hello");
        message.set_metadata(PARTITION_KEY_KEY, "pk-1");
        message.set_metadata("trace", "abc");

        let entry = JsonMarshaller.marshal(&message).unwrap();
        assert_eq!(entry.partition_key, "pk-1");

        let envelope: serde_json::Value = serde_json::from_slice(&entry.data).unwrap();
        assert_eq!(envelope["watermill_message_uuid"], "id-1");
        assert_eq!(envelope["data"], "aGVsbG8=");
        assert_eq!(envelope["headers"]["trace"], "abc");
    }

    #[test]
    fn marshal_without_partition_key_uses_empty_key() {
        let entry = JsonMarshaller.marshal(&Message::new("id-1", "hello")).unwrap();
        assert_eq!(entry.partition_key, "");
    }

    #[test]
    fn unmarshal_adds_record_metadata() {
        let message = JsonUnmarshaller
            .unmarshal(&record(
                r#"{"watermill_message_uuid":"id-1","data":"aGVsbG8=","headers":{"trace":"abc"}}"#,
            ))
            .unwrap();

        assert_eq!(message.uuid(), "id-1");
        assert_eq!(message.payload(), &Bytes::from_static(b"hello"));
        assert_eq!(message.metadata_value("trace"), Some("abc"));
        assert_eq!(message.metadata_value(PARTITION_KEY_KEY), Some("pk-1"));
        assert_eq!(
            message.metadata_value(APPROXIMATE_ARRIVAL_TIMESTAMP_KEY),
            Some("2024-05-01T12:30:00Z")
        );
    }

    #[test]
    fn unmarshal_accepts_missing_headers() {
        let message = JsonUnmarshaller
            .unmarshal(&record(r#"{"watermill_message_uuid":"id-1","data":""}"#))
            .unwrap();

        assert!(message.payload().is_empty());
        assert_eq!(message.metadata().len(), 2);
    }

    #[test]
    fn unmarshal_reads_envelopes_with_null_headers() {
        let message = JsonUnmarshaller
            .unmarshal(&record(
                r#"{"watermill_message_uuid":"id-2","data":"aGk=","headers":null}"#,
            ))
            .unwrap();

        assert_eq!(message.uuid(), "id-2");
        assert_eq!(message.payload(), &Bytes::from_static(b"hi"));
        assert_eq!(message.metadata().len(), 2);
    }

    #[test]
    fn unmarshal_rejects_envelopes_without_watermill_id() {
        let err = JsonUnmarshaller
            .unmarshal(&record(r#"{"message_uuid":"id-1","data":"aGk="}"#))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DecodeFailed);
    }

    #[test]
    fn unmarshal_rejects_invalid_input() {
        let invalid_json = JsonUnmarshaller.unmarshal(&record("not json")).unwrap_err();
        assert_eq!(invalid_json.kind(), ErrorKind::DecodeFailed);

        let invalid_base64 = JsonUnmarshaller
            .unmarshal(&record(r#"{"watermill_message_uuid":"id-1","data":"%%%"}"#))
            .unwrap_err();
        assert_eq!(invalid_base64.kind(), ErrorKind::DecodeFailed);

        let empty_id = JsonUnmarshaller
            .unmarshal(&record(r#"{"watermill_message_uuid":"","data":""}"#))
            .unwrap_err();
        assert_eq!(empty_id.kind(), ErrorKind::DecodeFailed);
    }

    #[test]
    fn marshalled_entries_decode_to_the_same_message() {
        let mut message = Message::new("id-1", "hello");
        message.set_metadata(PARTITION_KEY_KEY, "pk-1");
        let entry = JsonMarshaller.marshal(&message).unwrap();

        let decoded = JsonUnmarshaller.unmarshal(&record(entry.data)).unwrap();
        assert_eq!(decoded.uuid(), message.uuid());
        assert_eq!(decoded.payload(), message.payload());
    }
}
