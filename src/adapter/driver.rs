// 駆動する側アダプター（定期実行など）

mod expiry_sweeper;

pub use expiry_sweeper::ExpirySweeper;
