//! Task trait - 型付きジョブの定義
//!
//! job_type の文字列と payload の型を対応付けます。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は job_type と payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl Task for SendEmail {
///     const TYPE: &'static str = "mail.send.v1";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: enqueue 時に payload へ変換するため
/// - `DeserializeOwned`: 実行時に payload から復元するため
/// - `Send + Sync + 'static`: Processor として Arc に格納するため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}
