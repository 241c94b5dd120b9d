use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;

/// UUIDをラップした識別子型を定義する
/// 各エンティティのIDを型レベルで区別するために使う
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// 新しい一意のIDを生成
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// UUIDからIDを作成
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// 文字列からIDを作成
            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                let uuid = Uuid::parse_str(s)?;
                Ok(Self(uuid))
            }

            /// 内部のUUIDを取得
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

entity_id!(
    /// 倉庫の一意識別子
    WarehouseId
);
entity_id!(
    /// 資材の一意識別子
    MaterialId
);
entity_id!(
    /// 在庫レコードの一意識別子
    StockRecordId
);
entity_id!(
    /// 在庫移動の一意識別子
    StockMovementId
);
entity_id!(
    /// 資材要求の一意識別子
    MaterialRequestId
);
entity_id!(
    /// 資材要求明細の一意識別子
    MaterialRequestItemId
);
entity_id!(
    /// 保守要求の一意識別子
    MaintenanceRequestId
);
entity_id!(
    /// ピッキングオーダーの一意識別子
    PickingOrderId
);
entity_id!(
    /// ピッキングオーダー明細の一意識別子
    PickingOrderItemId
);
entity_id!(
    /// 制限オーダーの一意識別子
    RestrictionOrderId
);
entity_id!(
    /// 制限オーダー明細の一意識別子
    RestrictionOrderItemId
);
entity_id!(
    /// 出庫の一意識別子
    WithdrawalId
);
entity_id!(
    /// 出庫明細の一意識別子
    WithdrawalItemId
);
entity_id!(
    /// 入庫の一意識別子
    ReceiptId
);
entity_id!(
    /// 入庫明細の一意識別子
    ReceiptItemId
);
entity_id!(
    /// 操作者（倉庫担当者）の一意識別子
    OperatorId
);

/// 採番済みの連番から帳票番号を作成
/// 例: `format_protocol("PCK", 12)` → `PCK-000012`
pub fn format_protocol(prefix: &str, sequence: i64) -> String {
    format!("{}-{:06}", prefix, sequence)
}

/// 数量 × 単価の合計を計算
/// 1行でも単価が欠けている場合、または行が空の場合は None
pub fn total_value<I>(lines: I) -> Option<Decimal>
where
    I: IntoIterator<Item = (Decimal, Option<Decimal>)>,
{
    let mut total = Decimal::ZERO;
    let mut any = false;
    for (quantity, unit_price) in lines {
        let unit_price = unit_price?;
        total += quantity * unit_price;
        any = true;
    }
    if any {
        Some(total)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ids_are_unique() {
        let id1 = PickingOrderId::new();
        let id2 = PickingOrderId::new();
        assert_ne!(id1, id2, "Each PickingOrderId should be unique");
    }

    #[test]
    fn test_id_string_round_trip() {
        let id = WarehouseId::new();
        let parsed = WarehouseId::from_string(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_from_invalid_string() {
        assert!(MaterialId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_format_protocol() {
        assert_eq!(format_protocol("PCK", 12), "PCK-000012");
        assert_eq!(format_protocol("RST", 1_234_567), "RST-1234567");
    }

    #[test]
    fn test_total_value_all_priced() {
        let value = total_value(vec![
            (dec!(2), Some(dec!(10.5))),
            (dec!(3), Some(dec!(1))),
        ]);
        assert_eq!(value, Some(dec!(24)));
    }

    #[test]
    fn test_total_value_missing_price() {
        let value = total_value(vec![(dec!(2), Some(dec!(10))), (dec!(3), None)]);
        assert_eq!(value, None);
    }

    #[test]
    fn test_total_value_empty() {
        assert_eq!(total_value(Vec::new()), None);
    }
}
