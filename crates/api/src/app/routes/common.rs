use std::str::FromStr;

use shelflife_core::{StoreId, SyncItemId};

use crate::app::errors;

pub fn parse_store_id(raw: &str) -> Result<StoreId, axum::response::Response> {
    StoreId::from_str(raw).map_err(|_| errors::invalid_id("store_id", raw))
}

pub fn parse_item_id(raw: &str) -> Result<SyncItemId, axum::response::Response> {
    SyncItemId::from_str(raw).map_err(|_| errors::invalid_id("item_id", raw))
}
