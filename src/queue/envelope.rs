use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{WorkerError, WorkerResult};

pub const CRAWL_PRODUCT: &str = "crawl_product";
pub const WISHLIST_CREATED: &str = "wishlist_created";
pub const WISHITEM_CREATED: &str = "wishitem_created";
pub const ACCOUNT_UPDATED: &str = "account_updated";

/// Wire format of every task on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub payload: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Producers serialize an unset payload as `null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    pub fn new(message_type: &str, payload: Map<String, Value>) -> Self {
        Self {
            message_type: message_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn crawl_product(request_id: &str, product_url: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("request_id".to_string(), Value::from(request_id));
        payload.insert("product_url".to_string(), Value::from(product_url));
        Self::new(CRAWL_PRODUCT, payload)
    }

    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlProductPayload {
    pub request_id: String,
    pub product_url: String,
}

impl CrawlProductPayload {
    pub fn from_envelope(envelope: &Envelope) -> WorkerResult<Self> {
        let product_url = match envelope.payload.get("product_url") {
            Some(Value::String(url)) if !url.trim().is_empty() => url.trim().to_string(),
            Some(Value::String(_)) => {
                return Err(WorkerError::MalformedMessage(
                    "product_url is empty".to_string(),
                ))
            }
            Some(_) => {
                return Err(WorkerError::MalformedMessage(
                    "product_url is not a string".to_string(),
                ))
            }
            None => {
                return Err(WorkerError::MalformedMessage(
                    "missing product_url".to_string(),
                ))
            }
        };

        // Producers have sent the id both as a string and as a bare number.
        let request_id = match envelope.payload.get("request_id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(WorkerError::MalformedMessage(
                    "missing request_id".to_string(),
                ))
            }
        };

        Ok(Self {
            request_id,
            product_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_producer_message() {
        let body = br#"{"type":"crawl_product","payload":{"request_id":"r1","product_url":"https://market.yandex.ru/product/1"},"timestamp":"2024-05-01T10:00:00.123456789+03:00"}"#;
        let envelope = Envelope::from_slice(body).unwrap();

        assert_eq!(envelope.message_type, CRAWL_PRODUCT);
        let payload = CrawlProductPayload::from_envelope(&envelope).unwrap();
        assert_eq!(payload.request_id, "r1");
        assert_eq!(payload.product_url, "https://market.yandex.ru/product/1");
    }

    #[test]
    fn test_timestamp_and_payload_are_optional() {
        let envelope = Envelope::from_slice(br#"{"type":"account_updated"}"#).unwrap();
        assert_eq!(envelope.message_type, ACCOUNT_UPDATED);
        assert!(envelope.payload.is_empty());
    }

    #[test]
    fn test_null_payload_is_empty() {
        let envelope = Envelope::from_slice(
            br#"{"type":"wishlist_created","payload":null,"timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(envelope.message_type, WISHLIST_CREATED);
        assert!(envelope.payload.is_empty());

        let crawl = Envelope::from_slice(br#"{"type":"crawl_product","payload":null}"#).unwrap();
        assert!(matches!(
            CrawlProductPayload::from_envelope(&crawl),
            Err(WorkerError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_numeric_request_id() {
        let envelope = Envelope::new(
            CRAWL_PRODUCT,
            json!({"request_id": 17, "product_url": "https://market.yandex.ru/product/1"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let payload = CrawlProductPayload::from_envelope(&envelope).unwrap();
        assert_eq!(payload.request_id, "17");
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let cases = [
            json!({"request_id": "r1"}),
            json!({"request_id": "r1", "product_url": ""}),
            json!({"request_id": "r1", "product_url": 5}),
            json!({"product_url": "https://market.yandex.ru/product/1"}),
        ];
        for payload in cases {
            let envelope = Envelope::new(CRAWL_PRODUCT, payload.as_object().unwrap().clone());
            let error = CrawlProductPayload::from_envelope(&envelope).unwrap_err();
            assert!(matches!(error, WorkerError::MalformedMessage(_)), "{payload}");
        }
    }

    #[test]
    fn test_crawl_product_wire_shape() {
        let envelope = Envelope::crawl_product("r9", "https://market.yandex.ru/product/9");
        let value: Value = serde_json::from_slice(&envelope.to_vec().unwrap()).unwrap();
        assert_eq!(value["type"], "crawl_product");
        assert_eq!(value["payload"]["request_id"], "r9");
        assert!(value["timestamp"].is_string());
    }
}
