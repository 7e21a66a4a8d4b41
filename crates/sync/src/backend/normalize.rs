//! Payload normalization.
//!
//! Different server versions spell the same cart and catalog fields
//! differently. This module is the single place that knows the synonyms;
//! each list below is in precedence order and the first present, non-blank
//! value wins.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;
use tidecart_core::money::{checked_line_total, unit_price_from_total};
use tidecart_core::{CartLine, LineId, ProductId};
use tracing::warn;
use url::Url;

/// Keys that may wrap the list of cart lines.
pub const CART_LIST_KEYS: &[&str] = &["carrinho", "itens", "items"];
/// Keys that may wrap the catalog listing.
pub const CATALOG_LIST_KEYS: &[&str] = &["produtos", "products"];

pub const LINE_ID_KEYS: &[&str] = &["id_item", "id_carrinho", "id"];
pub const LINE_PRODUCT_ID_KEYS: &[&str] = &["id_produto", "produto_id", "product_id"];
pub const CATALOG_ID_KEYS: &[&str] = &["id_produto", "id", "product_id"];
pub const NAME_KEYS: &[&str] = &["nome_produto", "nome", "name"];
pub const QUANTITY_KEYS: &[&str] = &["quantidade", "qtd", "quantity"];
pub const UNIT_PRICE_KEYS: &[&str] = &["preco_unitario", "valor_unitario", "preco", "price"];
pub const LINE_TOTAL_KEYS: &[&str] = &["valor_total", "total"];
pub const IMAGE_KEYS: &[&str] = &["imagem_produto", "imagem", "foto", "imagem_url", "image"];

/// Directory the server serves bare image file names from.
const IMAGE_DIR: &str = "static/imagens";

/// A payload that does not have the expected shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed response: {0}")]
pub struct MalformedPayload(pub String);

/// One catalog entry, as needed by the identity resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    pub image_ref: Option<String>,
}

/// Normalize a cart payload into cart lines.
///
/// Accepts a bare array or an object wrapping one under a known key. Lines
/// with quantity zero are dropped, and so are lines without a usable
/// quantity or price, with a warning. Product IDs may be missing; resolving
/// them is the reconciler's job.
///
/// # Errors
///
/// Returns `MalformedPayload` if the payload has no line list, if a line is
/// not an object or lacks a line ID, or if a line total overflows.
pub fn cart_lines(payload: &Value) -> Result<Vec<CartLine>, MalformedPayload> {
    let items = list_in(payload, CART_LIST_KEYS)
        .ok_or_else(|| MalformedPayload("cart payload has no line list".to_string()))?;

    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| MalformedPayload(format!("cart line {index} is not an object")))?;
        if let Some(line) = cart_line(obj, index)? {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn cart_line(
    obj: &Map<String, Value>,
    index: usize,
) -> Result<Option<CartLine>, MalformedPayload> {
    let line_id = first_field(obj, LINE_ID_KEYS)
        .and_then(as_text)
        .map(LineId::from)
        .ok_or_else(|| MalformedPayload(format!("cart line {index} has no line id")))?;

    let Some(quantity) = first_field(obj, QUANTITY_KEYS).and_then(as_u32) else {
        warn!(line_id = %line_id, "Dropping cart line without a valid quantity");
        return Ok(None);
    };
    if quantity == 0 {
        return Ok(None);
    }

    let unit_price = first_field(obj, UNIT_PRICE_KEYS)
        .and_then(as_decimal)
        .or_else(|| {
            first_field(obj, LINE_TOTAL_KEYS)
                .and_then(as_decimal)
                .and_then(|total| unit_price_from_total(total, quantity))
        });
    let Some(unit_price) = unit_price else {
        warn!(line_id = %line_id, "Dropping cart line without a price");
        return Ok(None);
    };
    if unit_price.is_sign_negative() {
        warn!(line_id = %line_id, %unit_price, "Dropping cart line with a negative price");
        return Ok(None);
    }
    if checked_line_total(unit_price, quantity).is_none() {
        return Err(MalformedPayload(format!("cart line {line_id} total overflows")));
    }

    let product_name = first_field(obj, NAME_KEYS)
        .and_then(as_text)
        .unwrap_or_else(|| {
            warn!(line_id = %line_id, "Cart line has no product name");
            String::new()
        });

    let product_id = first_field(obj, LINE_PRODUCT_ID_KEYS).and_then(as_i64).map(ProductId::new);

    Ok(Some(
        CartLine::new(line_id, product_id, product_name, quantity, unit_price)
            .with_image(image_field(obj)),
    ))
}

/// Normalize a catalog payload. Entries without an ID or a name are skipped.
///
/// # Errors
///
/// Returns `MalformedPayload` if the payload has no product list.
pub fn catalog_products(payload: &Value) -> Result<Vec<CatalogProduct>, MalformedPayload> {
    let items = list_in(payload, CATALOG_LIST_KEYS)
        .ok_or_else(|| MalformedPayload("catalog payload has no product list".to_string()))?;

    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let obj = item.as_object()?;
            let id = first_field(obj, CATALOG_ID_KEYS).and_then(as_i64);
            let name = first_field(obj, NAME_KEYS).and_then(as_text);
            match (id, name) {
                (Some(id), Some(name)) => Some(CatalogProduct {
                    id: ProductId::new(id),
                    name,
                    image_ref: image_field(obj),
                }),
                _ => {
                    warn!(index, "Skipping catalog entry without id or name");
                    None
                }
            }
        })
        .collect())
}

/// Build a display URL for an image reference.
///
/// Absolute URLs pass through; paths containing a `/` are resolved against
/// the base; bare file names live in the server's image directory.
#[must_use]
pub fn image_url(base: &Url, image_ref: &str) -> Option<String> {
    let image_ref = clean_image_ref(image_ref)?;
    if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
        return Some(image_ref);
    }

    let root = base.as_str().trim_end_matches('/');
    let path = image_ref.trim_start_matches('/');
    if path.contains('/') {
        Some(format!("{root}/{path}"))
    } else {
        Some(format!("{root}/{IMAGE_DIR}/{path}"))
    }
}

fn clean_image_ref(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return None;
    }
    Some(trimmed.replace('\\', "/"))
}

fn image_field(obj: &Map<String, Value>) -> Option<String> {
    IMAGE_KEYS
        .iter()
        .filter_map(|key| obj.get(*key))
        .find_map(|value| value.as_str().and_then(clean_image_ref))
}

fn list_in<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(obj) => keys
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array)),
        _ => None,
    }
}

fn first_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| obj.get(*key)).find(|value| match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                // Whole floats such as 2.0 show up from some server versions.
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .and_then(|f| format!("{f:.0}").parse().ok())
            })
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim().replace(',', ".").as_str()).ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cart_lines_original_shape() {
        let payload = json!({
            "carrinho": [{
                "id_item": 31,
                "nome_produto": "Filtro de Óleo",
                "quantidade": 2,
                "valor_total": 79.8,
                "imagem_produto": "104.png"
            }]
        });
        let lines = cart_lines(&payload).unwrap();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line.line_id, LineId::from("31"));
        assert_eq!(line.product_id, None);
        assert_eq!(line.product_name, "Filtro de Óleo");
        assert_eq!(line.unit_price, Decimal::new(3990, 2));
        assert_eq!(line.line_total, Decimal::new(7980, 2));
        assert_eq!(line.image_ref.as_deref(), Some("104.png"));
    }

    #[test]
    fn test_cart_lines_synonyms_and_bare_array() {
        let payload = json!([{
            "id_carrinho": "a7",
            "produto_id": "12",
            "nome": "Amortecedor",
            "qtd": "3",
            "preco": "50.00",
            "foto": "static\\imagens\\9.png"
        }]);
        let line = cart_lines(&payload).unwrap().remove(0);
        assert_eq!(line.line_id, LineId::from("a7"));
        assert_eq!(line.product_id, Some(ProductId::new(12)));
        assert_eq!(line.quantity, 3);
        assert_eq!(line.unit_price, Decimal::new(5000, 2));
        assert_eq!(line.line_total, Decimal::new(15000, 2));
        assert_eq!(line.image_ref.as_deref(), Some("static/imagens/9.png"));
    }

    #[test]
    fn test_unit_price_beats_stale_total() {
        let payload = json!({"itens": [{
            "id": 1, "nome": "Vela", "quantidade": 4,
            "preco_unitario": 10, "valor_total": 999
        }]});
        let line = cart_lines(&payload).unwrap().remove(0);
        assert_eq!(line.line_total, Decimal::new(40, 0));
    }

    #[test]
    fn test_image_precedence_skips_null_strings() {
        let payload = json!({"carrinho": [{
            "id_item": 1, "nome": "Vela", "quantidade": 1, "preco": 1,
            "imagem_produto": "null", "imagem": "  ", "foto": "f.png", "image": "i.png"
        }]});
        let line = cart_lines(&payload).unwrap().remove(0);
        assert_eq!(line.image_ref.as_deref(), Some("f.png"));
    }

    #[test]
    fn test_zero_quantity_lines_dropped() {
        let payload = json!({"carrinho": [
            {"id_item": 1, "nome": "A", "quantidade": 0, "preco": 1},
            {"id_item": 2, "nome": "B", "quantidade": 1, "preco": 1}
        ]});
        let lines = cart_lines(&payload).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_id, LineId::from(2));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(cart_lines(&json!({"mensagem": "ok"})).is_err());
        assert!(cart_lines(&json!("carrinho")).is_err());
        let no_line_id = json!({"carrinho": [{"nome": "A", "quantidade": 1, "preco": 1}]});
        assert!(cart_lines(&no_line_id).is_err());
        assert!(cart_lines(&json!({"carrinho": [3]})).is_err());
    }

    #[test]
    fn test_unusable_line_dropped_beside_good_ones() {
        let payload = json!({"carrinho": [
            {"id_item": 1, "nome": "A", "quantidade": 2, "preco": "10.00"},
            {"id_item": 2, "nome": "B", "quantidade": -1, "preco": 1},
            {"id_item": 3, "nome": "C", "quantidade": 1},
            {"id_item": 4, "nome": "D", "preco": 5},
            {"id_item": 5, "nome": "E", "quantidade": 1, "preco": -3},
            {"id_item": 6, "nome": "F", "quantidade": 1, "preco": 7}
        ]});
        let lines = cart_lines(&payload).unwrap();
        let ids: Vec<_> = lines.iter().map(|l| l.line_id.clone()).collect();
        assert_eq!(ids, vec![LineId::from(1), LineId::from(6)]);
    }

    #[test]
    fn test_line_total_overflow_is_malformed() {
        let payload = json!({"carrinho": [
            {"id_item": 1, "nome": "A", "quantidade": 2, "preco": "79228162514264337593543950335"}
        ]});
        let err = cart_lines(&payload).unwrap_err();
        assert!(err.0.contains("overflows"));
    }

    #[test]
    fn test_missing_name_degrades_to_empty() {
        let payload = json!({"carrinho": [{"id_item": 1, "quantidade": 1, "preco": 2}]});
        let line = cart_lines(&payload).unwrap().remove(0);
        assert_eq!(line.product_name, "");
    }

    #[test]
    fn test_catalog_products_skips_incomplete_entries() {
        let payload = json!({"produtos": [
            {"id_produto": 9, "nome": "Filtro de Óleo", "imagem": "9.png"},
            {"id": "10", "name": "Correia"},
            {"nome": "Sem id"},
            {"id": 11}
        ]});
        let products = catalog_products(&payload).unwrap();
        assert_eq!(
            products,
            vec![
                CatalogProduct {
                    id: ProductId::new(9),
                    name: "Filtro de Óleo".into(),
                    image_ref: Some("9.png".into()),
                },
                CatalogProduct {
                    id: ProductId::new(10),
                    name: "Correia".into(),
                    image_ref: None,
                },
            ]
        );
    }

    #[test]
    fn test_image_url_forms() {
        let base = Url::parse("http://192.168.1.122:5000/").unwrap();
        assert_eq!(
            image_url(&base, "104.png").as_deref(),
            Some("http://192.168.1.122:5000/static/imagens/104.png")
        );
        assert_eq!(
            image_url(&base, "static\\imagens\\1.png").as_deref(),
            Some("http://192.168.1.122:5000/static/imagens/1.png")
        );
        assert_eq!(
            image_url(&base, "https://cdn.example.com/x.png").as_deref(),
            Some("https://cdn.example.com/x.png")
        );
        assert_eq!(image_url(&base, "null"), None);
    }

    #[test]
    fn test_decimal_parsing_variants() {
        assert_eq!(as_decimal(&json!(50)), Some(Decimal::new(50, 0)));
        assert_eq!(as_decimal(&json!("12,50")), Some(Decimal::new(1250, 2)));
        assert_eq!(as_decimal(&json!(true)), None);
    }

    #[test]
    fn test_whole_float_quantity() {
        assert_eq!(as_u32(&json!(2.0)), Some(2));
        assert_eq!(as_u32(&json!(2.5)), None);
        assert_eq!(as_u32(&json!(-1)), None);
    }
}
