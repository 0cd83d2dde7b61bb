use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::time::Instant;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::repositories::{
    AddressRepository, CartRepository, OrderRepository, PaymentRepository, StockLedger,
};

/// One database transaction together with the repositories that may run
/// inside it.
///
/// Every multi-step order procedure receives a `&UnitOfWork` and performs all
/// of its reads and writes through the repositories handed out here. Nothing
/// is visible to other connections until [`UnitOfWork::commit`]; dropping the
/// value without committing rolls everything back.
pub struct UnitOfWork {
    txn: DatabaseTransaction,
    started: Instant,
}

impl UnitOfWork {
    pub async fn begin(db: &DatabaseConnection) -> Result<Self, ServiceError> {
        let txn = db.begin().await?;
        Ok(Self {
            txn,
            started: Instant::now(),
        })
    }

    pub fn orders(&self) -> OrderRepository<'_, DatabaseTransaction> {
        OrderRepository::new(&self.txn)
    }

    pub fn payments(&self) -> PaymentRepository<'_, DatabaseTransaction> {
        PaymentRepository::new(&self.txn)
    }

    pub fn products(&self) -> StockLedger<'_, DatabaseTransaction> {
        StockLedger::new(&self.txn)
    }

    pub fn carts(&self) -> CartRepository<'_, DatabaseTransaction> {
        CartRepository::new(&self.txn)
    }

    pub fn addresses(&self) -> AddressRepository<'_, DatabaseTransaction> {
        AddressRepository::new(&self.txn)
    }

    pub async fn commit(self) -> Result<(), ServiceError> {
        self.txn.commit().await?;
        counter!("storefront_db.transaction.committed", 1);
        histogram!(
            "storefront_db.transaction.duration",
            self.started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), ServiceError> {
        self.txn.rollback().await?;
        counter!("storefront_db.transaction.rolled_back", 1);
        Ok(())
    }

    /// Commits on `Ok`, rolls back on `Err`. A failed rollback is logged and
    /// the original error is returned.
    pub async fn finish<T>(self, result: Result<T, ServiceError>) -> Result<T, ServiceError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "rolling back unit of work");
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
