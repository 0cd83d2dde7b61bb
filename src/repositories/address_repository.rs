use sea_orm::{ConnectionTrait, DbErr, EntityTrait};
use uuid::Uuid;

use crate::entities::address;

pub struct AddressRepository<'c, C> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> AddressRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    pub async fn find(&self, address_id: Uuid) -> Result<Option<address::Model>, DbErr> {
        address::Entity::find_by_id(address_id).one(self.conn).await
    }
}
