//! CGI環境での実行をサポートするモジュール
//!
//! 環境変数と入力ストリームからリクエストを構築し、
//! CGIのレスポンス形式（ヘッダーブロック＋本文）で出力するための機能を提供します。

pub mod error_logging;
pub mod request;
pub mod response;
pub mod core;

pub use core::{error_response, run_cgi, Dispatcher};
pub use request::{RequestContext, Sources};
pub use response::{FinalizedResponse, ResponseBuilder};
