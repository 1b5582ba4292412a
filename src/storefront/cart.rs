//! The shopping cart and its mutations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache_key;
use crate::error::{QueryError, Result};
use crate::key::CacheKey;
use crate::mutation::Mutation;
use crate::transport::{ApiRequest, Transport, fetch_json};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_price: f64,
    #[serde(default)]
    pub product_image_url: Option<String>,
    pub quantity: i32,
    #[serde(default = "available_by_default")]
    pub available: bool,
    pub subtotal: f64,
}

const fn available_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub total_items: i32,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub shipping: f64,
    #[serde(default)]
    pub total: f64,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, id: i64) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartInput {
    pub product_id: String,
    pub quantity: i32,
}

impl AddToCartInput {
    pub fn new(product_id: impl Into<String>, quantity: i32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }

    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] for a blank product id or a
    /// quantity below one.
    pub fn validate(&self) -> Result<()> {
        require_id(&self.product_id, "Product ID")?;
        if self.quantity < 1 {
            return Err(QueryError::Validation(
                "Quantity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemInput {
    pub item_id: String,
    pub quantity: i32,
}

impl UpdateCartItemInput {
    pub fn new(item_id: impl Into<String>, quantity: i32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
        }
    }

    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] for a blank item id or a negative
    /// quantity.
    pub fn validate(&self) -> Result<()> {
        require_id(&self.item_id, "Item ID")?;
        if self.quantity < 0 {
            return Err(QueryError::Validation(
                "Quantity must be at least 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn item_path(item_id: &str) -> String {
    format!("/cart/items/{}", urlencoding::encode(item_id))
}

fn require_id(id: &str, what: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(QueryError::Validation(format!("{what} is required")));
    }
    Ok(())
}

pub fn cart_key() -> CacheKey {
    cache_key!["cart"]
}

/// `GET /cart`
pub async fn fetch_cart(transport: Arc<dyn Transport>) -> Result<Cart> {
    fetch_json(transport.as_ref(), ApiRequest::get("/cart")).await
}

/// `POST /cart/items`
pub fn add_item_mutation(transport: Arc<dyn Transport>) -> Mutation<AddToCartInput, Cart> {
    Mutation::new("add cart item", move |input: AddToCartInput| {
        let transport = Arc::clone(&transport);
        async move {
            input.validate()?;
            let request = ApiRequest::post("/cart/items").with_json(&input)?;
            fetch_json(transport.as_ref(), request).await
        }
    })
    .invalidates(cart_key())
}

/// `PUT /cart/items/{id}` with `{ quantity }`
pub fn update_item_mutation(transport: Arc<dyn Transport>) -> Mutation<UpdateCartItemInput, Cart> {
    Mutation::new("update cart item", move |input: UpdateCartItemInput| {
        let transport = Arc::clone(&transport);
        async move {
            input.validate()?;
            let request = ApiRequest::put(item_path(&input.item_id))
                .with_body(json!({ "quantity": input.quantity }));
            fetch_json(transport.as_ref(), request).await
        }
    })
    .invalidates(cart_key())
}

/// `DELETE /cart/items/{id}`
pub fn remove_item_mutation(transport: Arc<dyn Transport>) -> Mutation<String, Cart> {
    Mutation::new("remove cart item", move |item_id: String| {
        let transport = Arc::clone(&transport);
        async move {
            require_id(&item_id, "Item ID")?;
            let request = ApiRequest::delete(item_path(&item_id));
            fetch_json(transport.as_ref(), request).await
        }
    })
    .invalidates(cart_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_wire_format() {
        let cart: Cart = serde_json::from_value(json!({
            "items": [{
                "id": 3,
                "productId": 7,
                "productName": "Kettle",
                "productPrice": 39.5,
                "quantity": 2,
                "subtotal": 79.0,
                "createdAt": [2024, 1, 1]
            }],
            "totalItems": 2,
            "subtotal": 79.0,
            "tax": 7.9,
            "shipping": 0.0,
            "total": 86.9
        }))
        .unwrap();

        assert!(!cart.is_empty());
        let item = cart.item(3).unwrap();
        assert_eq!(item.product_id, 7);
        assert!(item.available);
        assert!(cart.item(4).is_none());
    }

    #[test]
    fn test_add_input_wire_format() {
        let body = serde_json::to_value(AddToCartInput::new("7", 1)).unwrap();
        assert_eq!(body, json!({ "productId": "7", "quantity": 1 }));
    }

    #[test]
    fn test_add_validation() {
        assert!(AddToCartInput::new("7", 1).validate().is_ok());
        assert_eq!(
            AddToCartInput::new("7", 0).validate(),
            Err(QueryError::Validation("Quantity must be at least 1".into()))
        );
        assert_eq!(
            AddToCartInput::new(" ", 1).validate(),
            Err(QueryError::Validation("Product ID is required".into()))
        );
    }

    #[test]
    fn test_item_path_encodes_id() {
        assert_eq!(item_path("11"), "/cart/items/11");
        assert_eq!(item_path("a/b"), "/cart/items/a%2Fb");
        assert_eq!(item_path("7?x=1#top"), "/cart/items/7%3Fx%3D1%23top");
    }

    #[test]
    fn test_update_validation() {
        assert!(UpdateCartItemInput::new("3", 0).validate().is_ok());
        assert!(UpdateCartItemInput::new("3", -1).validate().is_err());
        assert!(UpdateCartItemInput::new("", 2).validate().is_err());
    }
}
