//! Impls - ports の実装
//!
//! - **ShellExecutor**: `sh -c` によるコマンド実行
//! - **AzureQueueClient**: Azure Storage Queue（REST、SDK なし）
//! - **InMemoryQueue**: 開発用・テスト用

pub mod azure_queue;
pub mod inmem_queue;
pub mod shell;

pub use self::azure_queue::{AzureQueueClient, MessageEncoding, StorageAccount};
pub use self::inmem_queue::InMemoryQueue;
pub use self::shell::{DEFAULT_SHELL, ShellExecutor};
