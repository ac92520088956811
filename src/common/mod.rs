//! 共通の型とプロトコル部品（パーセントエンコーディング、クエリ解析、クッキー、セッション）

use std::collections::BTreeMap;

pub mod utils;
pub mod query;
pub mod cookie;
pub mod session;
pub mod traits;

/// 文字列→文字列のパラメータマップ（キーは一意、後勝ち）
pub type ParameterMap = BTreeMap<String, String>;

pub use utils::{decode_hex, encode_hex, percent_decode, percent_encode};
pub use query::{parse_query_string, sanitize, QueryStringParser};
pub use cookie::{CookieJar, CookieRecord, DuplicatePolicy, JarMode};
pub use session::{
    MemorySessionStore, SessionHandle, SessionManager, SessionPersistence, SessionRecord,
    SessionState,
};
pub use traits::Handler;
