use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable copy of the delivery address taken when an order is placed.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_addresses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub address_line_1: String,
    #[sea_orm(nullable)]
    pub address_line_2: Option<String>,
    pub postal_code: String,
    pub city: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::order::Entity")]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub fn snapshot_of(address: &super::address::Model) -> Self {
        Self {
            id: Set(Uuid::new_v4()),
            name: Set(address.name.clone()),
            address_line_1: Set(address.address_line_1.clone()),
            address_line_2: Set(address.address_line_2.clone()),
            postal_code: Set(address.postal_code.clone()),
            city: Set(address.city.clone()),
            country: Set(address.country.clone()),
            created_at: Set(Utc::now()),
        }
    }
}
