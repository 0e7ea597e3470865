use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::contact::ContactKey;

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `OrderValidationError` values.
pub enum OrderValidationError {
    #[error("order payload is not an object")]
    NotAnObject,
    #[error("order payload has invalid shape: {0}")]
    InvalidShape(String),
    #[error("order field `{0}` is required")]
    MissingField(&'static str),
    #[error("order total `{0}` is not a non-negative amount")]
    InvalidTotal(String),
}

const BUYER_NAME_KEYS: &[&str] = &["buyer_name", "nombre", "name"];
const PRODUCT_KEYS: &[&str] = &["product", "producto"];
const QUANTITY_KEYS: &[&str] = &["quantity", "cantidad"];
const TOTAL_KEYS: &[&str] = &["total", "totalArs", "total_ars", "total_amount"];
const ADDRESS_KEYS: &[&str] = &["address", "direccion"];
const POSTAL_CODE_KEYS: &[&str] = &["postal_code", "cp", "postalCode"];
const CITY_KEYS: &[&str] = &["city", "ciudad"];

/// First non-null value among `keys`, canonical key first. Extra aliases are ignored.
fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn optional_text(
    object: &Map<String, Value>,
    keys: &[&'static str],
) -> Result<Option<String>, OrderValidationError> {
    match lookup(object, keys) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(non_blank(Some(text.clone()))),
        Some(other) => Err(OrderValidationError::InvalidShape(format!(
            "`{}` must be a string, got {other}",
            keys[0]
        ))),
    }
}

/// Strings and numbers both read as trimmed text.
fn scalar_text(
    object: &Map<String, Value>,
    keys: &[&'static str],
) -> Result<Option<String>, OrderValidationError> {
    match lookup(object, keys) {
        None => Ok(None),
        Some(Value::String(text)) => Ok(non_blank(Some(text.clone()))),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(OrderValidationError::InvalidShape(format!(
            "`{}` must be a string or number, got {other}",
            keys[0]
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Validated order fields extracted from a generator reply.
pub struct OrderFields {
    pub buyer_name: Option<String>,
    pub product: String,
    pub quantity: String,
    pub total: f64,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

impl OrderFields {
    /// Validates an order object: product, quantity and total are mandatory;
    /// the remaining fields are optional but must be text when present
    /// (postal codes may also be numbers).
    pub fn from_value(value: &Value) -> Result<Self, OrderValidationError> {
        let Some(object) = value.as_object() else {
            return Err(OrderValidationError::NotAnObject);
        };

        let product = optional_text(object, PRODUCT_KEYS)?
            .ok_or(OrderValidationError::MissingField("product"))?;
        let quantity = scalar_text(object, QUANTITY_KEYS)?
            .ok_or(OrderValidationError::MissingField("quantity"))?;
        let total = match lookup(object, TOTAL_KEYS) {
            None => return Err(OrderValidationError::MissingField("total")),
            Some(Value::Number(number)) => number
                .as_f64()
                .ok_or_else(|| OrderValidationError::InvalidTotal(number.to_string()))?,
            Some(Value::String(text)) => parse_amount(text)
                .ok_or_else(|| OrderValidationError::InvalidTotal(text.clone()))?,
            Some(other) => return Err(OrderValidationError::InvalidTotal(other.to_string())),
        };
        if !total.is_finite() || total < 0.0 {
            return Err(OrderValidationError::InvalidTotal(total.to_string()));
        }

        Ok(Self {
            buyer_name: optional_text(object, BUYER_NAME_KEYS)?,
            product,
            quantity,
            total,
            address: optional_text(object, ADDRESS_KEYS)?,
            postal_code: scalar_text(object, POSTAL_CODE_KEYS)?,
            city: optional_text(object, CITY_KEYS)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Persisted order row; written at most once per (contact, bucket).
pub struct OrderRecord {
    pub contact: ContactKey,
    pub bucket: u64,
    #[serde(flatten)]
    pub fields: OrderFields,
    pub user_message: String,
    pub reply_message: String,
    pub created_unix_ms: u64,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Accepts `51.90`, `51,90 €`, `$ 1.234,50` style amounts.
fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || matches!(ch, '.' | ',' | '-'))
        .collect::<String>();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) if is_grouped(&cleaned, '.') => cleaned.replace('.', ""),
        (None, Some(_)) if is_grouped(&cleaned, ',') => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse::<f64>().ok()
}

/// True when every `separator`-delimited group after the first has three digits.
fn is_grouped(amount: &str, separator: char) -> bool {
    amount
        .split(separator)
        .skip(1)
        .all(|group| group.len() == 3)
}
