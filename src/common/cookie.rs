//! HTTPクッキー関連の実装

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use super::utils::{validate_cookie_name_value, validate_header_value};

/// Expires属性の書式（Wdy, DD-Mon-YYYY HH:MM:SS GMT）
pub const COOKIE_DATE_FORMAT: &str = "%a, %d-%b-%Y %H:%M:%S GMT";

/// クッキー1件分の情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieRecord {
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
}

impl CookieRecord {
    /// 値だけを持つクッキーを作成
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// パスを設定
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// ドメインを設定
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// 有効期限を設定
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    /// 有効期限をエポック秒で設定
    pub fn with_expire_epoch(mut self, epoch_secs: i64) -> Self {
        self.expires = Utc.timestamp_opt(epoch_secs, 0).single();
        self
    }

    /// セキュアフラグを設定
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// HttpOnlyフラグを設定
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// 有効期限（エポック秒）
    pub fn expire_epoch(&self) -> Option<i64> {
        self.expires.map(|e| e.timestamp())
    }

    /// Set-Cookieヘッダー値を生成
    ///
    /// Domain/Pathが未設定なら `default_domain` と `/` を使う。
    /// `force_secure` が真ならSecure属性を付ける。
    pub fn to_header_value(&self, name: &str, default_domain: Option<&str>, force_secure: bool) -> String {
        let mut cookie_str = format!("{}={}", name, self.value);

        if let Some(expires) = &self.expires {
            cookie_str.push_str(&format!("; Expires={}", expires.format(COOKIE_DATE_FORMAT)));
        }

        if let Some(domain) = self.domain.as_deref().or(default_domain) {
            cookie_str.push_str(&format!("; Domain={}", domain));
        }

        cookie_str.push_str(&format!("; Path={}", self.path.as_deref().unwrap_or("/")));

        if self.secure || force_secure {
            cookie_str.push_str("; Secure");
        }

        if self.http_only {
            cookie_str.push_str("; HttpOnly");
        }

        cookie_str
    }
}

/// クッキージャーの動作モード（作成後は変わらない）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JarMode {
    /// 受信したCookieヘッダーを読むだけ
    Request,
    /// 送信するクッキーを蓄積する
    Response,
}

/// 同名クッキーを再設定したときの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// 上書きする
    #[default]
    Overwrite,
    /// CookieAlreadyPresentで拒否する
    Reject,
}

/// クッキーの集合
#[derive(Debug, Clone)]
pub struct CookieJar {
    mode: JarMode,
    policy: DuplicatePolicy,
    cookies: BTreeMap<String, CookieRecord>,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieJar {
    /// 空のレスポンスモードのジャーを作成
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::default())
    }

    /// 重複ポリシーを指定してレスポンスモードのジャーを作成
    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            mode: JarMode::Response,
            policy,
            cookies: BTreeMap::new(),
        }
    }

    /// `Name1=Value1; Name2=Value2` 形式からリクエストモードのジャーを作成
    pub fn from_header(raw: &str) -> Self {
        let mut cookies = BTreeMap::new();
        let mut rest = raw;

        while !rest.is_empty() {
            let segment = match rest.find("; ") {
                Some(pos) => {
                    let segment = &rest[..pos];
                    rest = &rest[pos + 2..];
                    segment
                }
                None => std::mem::take(&mut rest),
            };

            let (name, value) = match segment.find('=') {
                Some(pos) => (&segment[..pos], &segment[pos + 1..]),
                None => (segment, ""),
            };
            if name.is_empty() {
                continue;
            }
            cookies.insert(name.to_string(), CookieRecord::new(value));
        }

        debug!("Parsed {} cookie(s) from request header", cookies.len());
        Self {
            mode: JarMode::Request,
            policy: DuplicatePolicy::default(),
            cookies,
        }
    }

    pub fn mode(&self) -> JarMode {
        self.mode
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    /// リクエストモードでクッキーの値を取得
    pub fn get_value(&self, name: &str) -> Result<&str, Error> {
        self.get_cookie(name).map(|record| record.value.as_str())
    }

    /// クッキーを取得
    ///
    /// 見つからない場合、リクエストモードではCookieNotFound、
    /// レスポンスモードではParamNotFoundを返す。
    pub fn get_cookie(&self, name: &str) -> Result<&CookieRecord, Error> {
        self.cookies.get(name).ok_or_else(|| match self.mode {
            JarMode::Request => Error::new(
                ErrorKind::CookieNotFound,
                format!("Cookie {} not found in request", name),
            ),
            JarMode::Response => Error::new(
                ErrorKind::ParamNotFound,
                format!("Cookie {} has not been set on the response", name),
            ),
        })
    }

    /// クッキーを設定（レスポンスモードのみ）
    pub fn set_cookie(&mut self, name: impl Into<String>, record: CookieRecord) -> Result<(), Error> {
        let name = name.into();
        if self.mode == JarMode::Request {
            return Err(Error::new(
                ErrorKind::CookieRequestMode,
                format!("Cannot set cookie {} on a request cookie jar", name),
            ));
        }

        validate_cookie_name_value(&name, &record.value)?;
        for attr in [&record.path, &record.domain].into_iter().flatten() {
            validate_header_value(attr)?;
        }

        if self.policy == DuplicatePolicy::Reject && self.cookies.contains_key(&name) {
            return Err(Error::new(
                ErrorKind::CookieAlreadyPresent,
                format!("Cookie {} is already set", name),
            ));
        }

        self.cookies.insert(name, record);
        Ok(())
    }

    /// 全クッキーのコピーを取得（変更してもジャーには影響しない）
    pub fn get_cookies(&self) -> BTreeMap<String, CookieRecord> {
        self.cookies.clone()
    }

    /// 名前順にクッキーを走査
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CookieRecord)> {
        self.cookies.iter()
    }
}
