use rust_decimal::Decimal;
use std::sync::Arc;

use crate::application::service::complete;
use crate::application::ApplicationError;
use crate::domain::model::{
    MaterialId, OperatorId, StockMovement, StockMovementId, StockRecord, WarehouseId,
};
use crate::domain::port::{Logger, SessionFactory};
use crate::domain::service::StockAdjustment;

/// 在庫アプリケーションサービス
/// 在庫レコードの参照と、棚卸・振替・在庫移動の取り消し
pub struct StockApplicationService {
    sessions: Arc<dyn SessionFactory>,
    adjustment: Arc<StockAdjustment>,
    logger: Arc<dyn Logger>,
}

impl StockApplicationService {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        adjustment: Arc<StockAdjustment>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            sessions,
            adjustment,
            logger,
        }
    }

    /// 棚卸数量を登録する
    pub async fn count_global_material_in_warehouse(
        &self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
        counted: Decimal,
        operator_id: Option<OperatorId>,
    ) -> Result<StockRecord, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .adjustment
            .count_global_material_in_warehouse(
                session.as_mut(),
                warehouse_id,
                material_id,
                counted,
                operator_id,
            )
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn reclassify(
        &self,
        warehouse_id: WarehouseId,
        from_material_id: MaterialId,
        to_material_id: MaterialId,
        quantity: Decimal,
        operator_id: Option<OperatorId>,
    ) -> Result<Vec<StockMovement>, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .adjustment
            .reclassify(
                session.as_mut(),
                warehouse_id,
                from_material_id,
                to_material_id,
                quantity,
                operator_id,
            )
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn delete_movement(
        &self,
        movement_id: StockMovementId,
    ) -> Result<StockMovement, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .adjustment
            .delete_movement(session.as_mut(), movement_id)
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn show(
        &self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<StockRecord, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .adjustment
            .show(session.as_mut(), warehouse_id, material_id)
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    /// 倉庫の在庫レコードを資材IDの昇順で取得する
    pub async fn list_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .adjustment
            .list_by_warehouse(session.as_mut(), warehouse_id)
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn list_movements(
        &self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Vec<StockMovement>, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .adjustment
            .list_movements(session.as_mut(), warehouse_id, material_id)
            .await;
        complete(session, result, self.logger.as_ref()).await
    }
}
