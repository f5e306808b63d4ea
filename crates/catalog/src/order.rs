use serde::{Deserialize, Serialize};

use shelflife_core::{OrderId, ProductId};

/// One line of a historical sales order (read-only input to correlation analysis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(
        order_id: OrderId,
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            order_id,
            product_id,
            product_name: product_name.into(),
            quantity,
        }
    }
}
