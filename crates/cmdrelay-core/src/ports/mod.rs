//! Ports - 抽象化レイヤー
//!
//! 外部システム（キューサービス、OS プロセス）へのインターフェース。
//! app 層はこれらの trait だけを見て組み立てる。

pub mod executor;
pub mod message_queue;

pub use self::executor::CommandExecutor;
pub use self::message_queue::{MessageQueue, QueueError, QueueMessage, QueueProperties};
