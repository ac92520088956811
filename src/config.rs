//! 設定値の定義と読み込み
//!
//! 設定ファイルの形式はホスト側が決める。ここではJSON文字列・任意のキー参照・
//! 環境変数からの読み込みだけを提供する。

use std::env;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::common::cookie::DuplicatePolicy;
use crate::common::utils::is_cookie_name_valid;
use crate::error::{Error, ErrorKind};

/// セッション有効期限のデフォルト（秒）
pub const DEFAULT_SESSION_EXPIRE: u64 = 3600;
/// セッションIDを運ぶクッキー名のデフォルト
pub const DEFAULT_SESSION_COOKIE: &str = "sess_id";
/// リクエストボディの最大サイズのデフォルト（5MB）
pub const DEFAULT_MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

/// セッションを作るタイミング
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCreation {
    /// 最初の書き込み時に作成
    #[default]
    Lazy,
    /// リクエストごとに必ず作成
    Eager,
}

/// セッション関連の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 有効期限（秒）
    pub expire: u64,
    pub cookie_name: String,
    pub creation: SessionCreation,
    /// 再開したセッションに書き込めるかどうか
    pub resumed_writable: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expire: DEFAULT_SESSION_EXPIRE,
            cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
            creation: SessionCreation::default(),
            resumed_writable: true,
        }
    }
}

/// クッキー関連の設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub duplicate_policy: DuplicatePolicy,
}

/// クエリ文字列関連の設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// `+` を空白としてデコードする
    pub plus_as_space: bool,
}

/// 全体の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgiConfig {
    pub session: SessionConfig,
    pub cookies: CookieConfig,
    pub query: QueryConfig,
    /// リクエストボディの最大サイズ（バイト）
    pub max_body_size: usize,
}

impl Default for CgiConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            cookies: CookieConfig::default(),
            query: QueryConfig::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl CgiConfig {
    /// JSON文字列から読み込む（欠けている項目はデフォルト）
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            Error::new(ErrorKind::Configuration, format!("Failed to parse configuration: {}", e))
        })?;
        if !is_cookie_name_valid(&config.session.cookie_name) {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!("Invalid session cookie name: {:?}", config.session.cookie_name),
            ));
        }
        Ok(config)
    }

    /// キーから値を引く関数で読み込む
    ///
    /// 参照するキー: `session_expire`, `session_cookie_name`, `session_creation`,
    /// `session_resumed_writable`, `cookie_duplicate_policy`, `query_plus_as_space`,
    /// `max_body_size`。不正な値は警告を出してデフォルトを使う。
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_or_warn::<u64>("session_expire", lookup("session_expire")) {
            config.session.expire = v;
        }
        if let Some(name) = lookup("session_cookie_name") {
            let name = name.trim();
            if is_cookie_name_valid(name) {
                config.session.cookie_name = name.to_string();
            } else {
                warn!("Ignoring invalid session_cookie_name value: {:?}", name);
            }
        }
        if let Some(raw) = lookup("session_creation") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "lazy" => config.session.creation = SessionCreation::Lazy,
                "eager" => config.session.creation = SessionCreation::Eager,
                other => warn!("Ignoring invalid session_creation value: {:?}", other),
            }
        }
        if let Some(v) = parse_or_warn::<bool>("session_resumed_writable", lookup("session_resumed_writable")) {
            config.session.resumed_writable = v;
        }
        if let Some(raw) = lookup("cookie_duplicate_policy") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "overwrite" => config.cookies.duplicate_policy = DuplicatePolicy::Overwrite,
                "reject" => config.cookies.duplicate_policy = DuplicatePolicy::Reject,
                other => warn!("Ignoring invalid cookie_duplicate_policy value: {:?}", other),
            }
        }
        if let Some(v) = parse_or_warn::<bool>("query_plus_as_space", lookup("query_plus_as_space")) {
            config.query.plus_as_space = v;
        }
        if let Some(v) = parse_or_warn::<usize>("max_body_size", lookup("max_body_size")) {
            config.max_body_size = v;
        }

        config
    }

    /// 環境変数から読み込む
    ///
    /// キーは `CGI_` + 大文字（例: `CGI_SESSION_EXPIRE`, `CGI_MAX_BODY_SIZE`）。
    /// `CGI_SESSION_COOKIE` は `CGI_SESSION_COOKIE_NAME` の別名。
    pub fn from_env() -> Self {
        Self::from_lookup(|key| {
            let var = format!("CGI_{}", key.to_ascii_uppercase());
            env::var(&var).ok().or_else(|| match key {
                "session_cookie_name" => env::var("CGI_SESSION_COOKIE").ok(),
                _ => None,
            })
        })
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring invalid {} value: {:?}", key, raw);
            None
        }
    }
}
