use log::{debug, trace, warn};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;
use url::Url;

use crate::{WorkerError, WorkerResult};

/// Appended to every extracted price.
pub const PRICE_CURRENCY_SYMBOL: &str = "₽";

static MICROMARKUP_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<!--\s*BEGIN \[@marketfront/JsonLd\][^>]*?productPageMicromarkup[^>]*?-->\s*<script[^>]*type="application/ld\+json"[^>]*>(.*?)</script>"#,
    )
    .expect("micromarkup block pattern is valid")
});
static NAME: LazyLock<Regex> = LazyLock::new(|| field_pattern("name"));
static IMAGE: LazyLock<Regex> = LazyLock::new(|| field_pattern("image"));
static URL: LazyLock<Regex> = LazyLock::new(|| field_pattern("url"));
static DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| field_pattern("description"));
static OFFER_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""offers"\s*:\s*\[?\s*\{[^}]*"price"\s*:\s*(?:"([^"]*)"|([0-9]+(?:\.[0-9]+)?))"#)
        .expect("offer price pattern is valid")
});

fn field_pattern(field: &str) -> Regex {
    Regex::new(&format!(r#""{}"\s*:\s*"([^"]*)""#, field)).expect("field pattern is valid")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductInfo {
    pub title: String,
    /// Price text with the currency symbol attached, e.g. `"199.99 ₽"`.
    pub price: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub canonical_url: Url,
}

#[derive(Debug, Default)]
struct Fields {
    name: Option<String>,
    image: Option<String>,
    price: Option<String>,
    url: Option<String>,
    description: Option<String>,
}

/// Pulls the product record out of the JSON-LD micromarkup block a catalog page embeds.
///
/// The block is parsed as JSON when possible; if it is not valid JSON each field is
/// scanned for by pattern instead. Fields are independent of each other, except that
/// a record without a name is no record at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductExtractor;

impl ProductExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, page: &str, source_url: &Url) -> WorkerResult<ProductInfo> {
        let Some(block) = Self::isolate_block(page) else {
            debug!("No micromarkup block on {}", source_url);
            trace!("Page without micromarkup: {}", page);
            return Err(WorkerError::NotFound(source_url.to_string()));
        };

        let fields = match serde_json::from_str::<Value>(block) {
            Ok(value) => Self::fields_from_json(&value),
            Err(e) => {
                warn!(
                    "Micromarkup on {} is not valid JSON ({}), scanning fields by pattern",
                    source_url, e
                );
                Self::fields_from_patterns(block)
            }
        };

        let title = fields
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| WorkerError::NotFound(source_url.to_string()))?;

        let canonical_url = fields
            .url
            .and_then(|url| source_url.join(url.trim()).ok())
            .unwrap_or_else(|| source_url.clone());

        Ok(ProductInfo {
            title,
            price: fields
                .price
                .map(|price| price.trim().to_string())
                .filter(|price| !price.is_empty())
                .map(|price| format!("{} {}", price, PRICE_CURRENCY_SYMBOL)),
            image_url: fields.image.filter(|image| !image.is_empty()),
            description: fields.description.filter(|d| !d.is_empty()),
            canonical_url,
        })
    }

    fn isolate_block(page: &str) -> Option<&str> {
        MICROMARKUP_BLOCK
            .captures(page)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim())
    }

    fn fields_from_json(value: &Value) -> Fields {
        let Some(product) = Self::product_node(value) else {
            return Fields::default();
        };

        let string = |key: &str| product.get(key).and_then(Self::as_text);
        let image = product.get("image").and_then(|image| match image {
            Value::Array(images) => images.iter().find_map(Self::as_text_or_url),
            other => Self::as_text_or_url(other),
        });
        let price = product.get("offers").and_then(|offers| {
            let offer = match offers {
                Value::Array(offers) => offers.first()?,
                other => other,
            };
            offer.get("price").and_then(Self::as_text)
        });

        Fields {
            name: string("name"),
            image,
            price,
            url: string("url"),
            description: string("description"),
        }
    }

    /// The top-level object, or the `Product` node of an array or `@graph`.
    fn product_node(value: &Value) -> Option<&Value> {
        let candidates: Vec<&Value> = match value {
            Value::Array(nodes) => nodes.iter().collect(),
            Value::Object(map) => match map.get("@graph") {
                Some(Value::Array(nodes)) => nodes.iter().collect(),
                _ => return Some(value),
            },
            _ => return None,
        };

        candidates
            .iter()
            .find(|node| node.get("@type").and_then(Value::as_str) == Some("Product"))
            .or_else(|| candidates.iter().find(|node| node.is_object()))
            .copied()
    }

    fn as_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn as_text_or_url(value: &Value) -> Option<String> {
        Self::as_text(value).or_else(|| value.get("url").and_then(Self::as_text))
    }

    fn fields_from_patterns(block: &str) -> Fields {
        let capture = |pattern: &Regex| {
            pattern
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };

        Fields {
            name: capture(&NAME),
            image: capture(&IMAGE),
            price: OFFER_PRICE
                .captures(block)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string()),
            url: capture(&URL),
            description: capture(&DESCRIPTION),
        }
    }
}
