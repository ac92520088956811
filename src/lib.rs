//! cgibridge: CGIプログラム向けのリクエスト／レスポンスツールキット
//!
//! 環境変数と標準入力からリクエストを組み立て、クエリ・フォーム・クッキー・セッション・
//! 環境変数を一つの検索順で参照し、CGIのレスポンスを組み立てて出力する。

pub mod common;
pub mod config;
pub mod error;
pub mod cgi;

pub use common::*;
pub use config::{CgiConfig, CookieConfig, QueryConfig, SessionConfig, SessionCreation};
pub use error::{Error, ErrorKind};
pub use cgi::{run_cgi, Dispatcher, FinalizedResponse, RequestContext, ResponseBuilder, Sources};
