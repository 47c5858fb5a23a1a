//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: 構築・ワイヤリングと起動順序
//! - **QueueProber**: 起動時のキュー疎通確認（fail-open）
//! - **PollingWorker**: receive→parse→execute→respond→delete のループ
//! - **http**: `POST /execute` と `GET /health`
//! - **backoff**: prober とワーカーが共有するリトライ間隔の計算
//! - **workdir**: project 名 → 作業ディレクトリ
//! - **status**: health 用の共有ステータス

pub mod backoff;
pub mod builder;
pub mod http;
pub mod prober;
pub mod status;
pub mod workdir;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::backoff::{BackoffPolicy, BackoffState};
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::http::HttpState;
pub use self::prober::{QueueProber, Readiness};
pub use self::status::{HealthReport, ServiceStatus};
pub use self::workdir::WorkdirResolver;
pub use self::worker_loop::{PollingWorker, WorkerHandle, WorkerSettings, WorkerState};
