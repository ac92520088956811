//! CGIリクエストの処理機能

use std::io::{self, Read};

use bitflags::bitflags;
use bytes::Bytes;
use log::debug;

use crate::common::{
    CookieJar, DuplicatePolicy, ParameterMap, QueryStringParser, SessionHandle, SessionManager,
    SessionPersistence,
};
use crate::config::{CgiConfig, SessionCreation};
use crate::error::{Error, ErrorKind};

bitflags! {
    /// パラメータの取得元
    ///
    /// 検索順は常に GET → POST → COOKIE → SESSION → ENV。
    pub struct Sources: u8 {
        const GET = 0b0000_0001;
        const POST = 0b0000_0010;
        const COOKIE = 0b0000_0100;
        const SESSION = 0b0000_1000;
        const ENV = 0b0001_0000;
        const GPCSE = 0b0001_1111;
    }
}

impl Default for Sources {
    fn default() -> Self {
        Sources::GPCSE
    }
}

/// POSTボディ（フォームとしてパース済みか、生のバイト列か）
#[derive(Debug, Clone)]
enum PostData {
    Form(ParameterMap),
    Raw(Bytes),
}

/// フォームとしてパースするContent-Typeか（空・未指定を含む）
pub fn is_form_content_type(content_type: &str) -> bool {
    let media = content_type.split(';').next().unwrap_or("").trim();
    media.is_empty() || media.eq_ignore_ascii_case("application/x-www-form-urlencoded")
}

/// `NAME=VALUE` 形式の環境変数列をマップにする
pub fn parse_env<I, S>(entries: I) -> ParameterMap
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .map(|entry| {
            let entry = entry.as_ref();
            match entry.find('=') {
                Some(pos) => (entry[..pos].to_string(), entry[pos + 1..].to_string()),
                None => (entry.to_string(), String::new()),
            }
        })
        .collect()
}

/// 1回の呼び出しで処理するCGIリクエスト
#[derive(Debug)]
pub struct RequestContext {
    env: ParameterMap,
    get: ParameterMap,
    post: PostData,
    cookies: CookieJar,
    session: SessionHandle,
    session_cookie_name: String,
    duplicate_policy: DuplicatePolicy,
}

impl RequestContext {
    /// 環境変数列と入力ストリームからリクエストを構築する
    ///
    /// POSTの場合は `CONTENT_LENGTH` を検証してから、そのバイト数をちょうど読み込む。
    /// セッションクッキーがあればそのIDでセッションを再開する。
    pub fn new<I, S, P>(
        env: I,
        input: Option<&mut dyn Read>,
        sessions: &mut SessionManager<P>,
        config: &CgiConfig,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        P: SessionPersistence,
    {
        let env = parse_env(env);

        let get = match env.get("QUERY_STRING").filter(|qs| !qs.is_empty()) {
            Some(qs) => QueryStringParser::with_source(qs.as_str())
                .plus_as_space(config.query.plus_as_space)
                .parse()?,
            None => ParameterMap::new(),
        };

        let post = if is_post_method(&env) {
            let body = read_post_body(&env, input)?;
            let content_type = env.get("CONTENT_TYPE").map(String::as_str).unwrap_or("");
            if is_form_content_type(content_type) {
                let text = String::from_utf8_lossy(&body).into_owned();
                PostData::Form(
                    QueryStringParser::with_source(text)
                        .plus_as_space(config.query.plus_as_space)
                        .parse()?,
                )
            } else {
                debug!("Keeping {} byte(s) of {} POST data as raw", body.len(), content_type);
                PostData::Raw(Bytes::from(body))
            }
        } else {
            PostData::Form(ParameterMap::new())
        };

        let cookies = CookieJar::from_header(env.get("HTTP_COOKIE").map(String::as_str).unwrap_or(""));

        let cookie_name = config.session.cookie_name.as_str();
        let session = match cookies.get_value(cookie_name).ok().filter(|id| !id.is_empty()) {
            Some(id) => sessions.get_instance(Some(id))?,
            None if config.session.creation == SessionCreation::Eager => sessions.get_instance(None)?,
            None => sessions.handle(),
        };

        debug!(
            "Built request context: {} env, {} GET, {} cookie(s), session {:?}",
            env.len(),
            get.len(),
            cookies.len(),
            session.id()
        );

        Ok(Self {
            env,
            get,
            post,
            cookies,
            session,
            session_cookie_name: config.session.cookie_name.clone(),
            duplicate_policy: config.cookies.duplicate_policy,
        })
    }

    /// 環境変数を取得
    pub fn get_env(&self, name: &str) -> Result<&str, Error> {
        self.env.get(name).map(String::as_str).ok_or_else(|| {
            Error::new(
                ErrorKind::EnvVarNotFound,
                format!("Environment variable {} not found", name),
            )
        })
    }

    /// 指定した取得元から最初に見つかった値を返す
    ///
    /// 検索順は GET → POST → COOKIE → SESSION → ENV で固定。
    pub fn get_param(&self, name: &str, sources: Sources) -> Result<String, Error> {
        self.ensure_post_readable(sources)?;

        if sources.contains(Sources::GET) {
            if let Some(v) = self.get.get(name) {
                return Ok(v.clone());
            }
        }
        if sources.contains(Sources::POST) {
            if let PostData::Form(post) = &self.post {
                if let Some(v) = post.get(name) {
                    return Ok(v.clone());
                }
            }
        }
        if sources.contains(Sources::COOKIE) {
            if let Ok(v) = self.cookies.get_value(name) {
                return Ok(v.to_string());
            }
        }
        if sources.contains(Sources::SESSION) {
            if let Ok(v) = self.session.get_param(name) {
                return Ok(v);
            }
        }
        if sources.contains(Sources::ENV) {
            if let Some(v) = self.env.get(name) {
                return Ok(v.clone());
            }
        }

        Err(Error::new(
            ErrorKind::ParamNotFound,
            format!("Request parameter {} not found in {:?}", name, sources),
        ))
    }

    /// 指定した取得元をまとめたマップを返す
    ///
    /// `get_param` と違い、キーが重複した場合は後の取得元（ENV側）が優先される。
    pub fn get_data(&self, sources: Sources) -> Result<ParameterMap, Error> {
        self.ensure_post_readable(sources)?;

        let mut data = ParameterMap::new();
        if sources.contains(Sources::GET) {
            data.extend(self.get.clone());
        }
        if sources.contains(Sources::POST) {
            if let PostData::Form(post) = &self.post {
                data.extend(post.clone());
            }
        }
        if sources.contains(Sources::COOKIE) {
            data.extend(self.cookies.iter().map(|(k, c)| (k.clone(), c.value.clone())));
        }
        if sources.contains(Sources::SESSION) {
            data.extend(self.session.data());
        }
        if sources.contains(Sources::ENV) {
            data.extend(self.env.clone());
        }
        Ok(data)
    }

    /// 生のPOSTボディを取得
    pub fn get_bin_post(&self) -> Result<&Bytes, Error> {
        match &self.post {
            PostData::Raw(bytes) => Ok(bytes),
            PostData::Form(_) => Err(Error::new(
                ErrorKind::PostIsNotBinary,
                "POST data was parsed as a form and is not binary",
            )),
        }
    }

    /// POSTボディが生のまま保持されているか
    pub fn is_post_binary(&self) -> bool {
        matches!(self.post, PostData::Raw(_))
    }

    /// HTTPメソッド（大文字）
    pub fn method(&self) -> Option<String> {
        self.env.get("REQUEST_METHOD").map(|m| m.trim().to_ascii_uppercase())
    }

    pub fn env(&self) -> &ParameterMap {
        &self.env
    }

    /// クエリパラメータ
    pub fn query_params(&self) -> &ParameterMap {
        &self.get
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// HTTPS経由のリクエストか（`HTTPS` / `HTTP_HTTPS` が on, 1, ON）
    pub fn is_https(&self) -> bool {
        self.env
            .get("HTTPS")
            .or_else(|| self.env.get("HTTP_HTTPS"))
            .map_or(false, |v| matches!(v.as_str(), "on" | "1" | "ON"))
    }

    /// クッキーのデフォルトドメイン（`.` + HTTP_HOST、無ければSERVER_NAME）
    pub fn cookie_domain(&self) -> Option<String> {
        let host = self
            .env
            .get("HTTP_HOST")
            .or_else(|| self.env.get("SERVER_NAME"))
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())?;

        // ポート番号はDomain属性に含めない
        let host = match host.rfind(':') {
            Some(pos)
                if !host[..pos].contains(':')
                    && host[pos + 1..].chars().all(|c| c.is_ascii_digit()) =>
            {
                &host[..pos]
            }
            _ => host,
        };

        if host.starts_with('.') {
            Some(host.to_string())
        } else {
            Some(format!(".{}", host))
        }
    }

    fn ensure_post_readable(&self, sources: Sources) -> Result<(), Error> {
        if sources.contains(Sources::POST) && self.is_post_binary() {
            return Err(Error::new(
                ErrorKind::PostIsBinary,
                "POST data is binary; use get_bin_post instead",
            ));
        }
        Ok(())
    }
}

/// `REQUEST_METHOD` がPOSTか（大文字小文字・前後の空白は無視）
pub fn is_post_method(env: &ParameterMap) -> bool {
    env.get("REQUEST_METHOD")
        .map_or(false, |m| m.trim().eq_ignore_ascii_case("POST"))
}

/// 宣言された `CONTENT_LENGTH` を取得する（正の整数でなければ `None`）
pub fn declared_content_length(env: &ParameterMap) -> Option<usize> {
    env.get("CONTENT_LENGTH")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
}

/// POSTボディを `CONTENT_LENGTH` バイトちょうど読み込む
fn read_post_body(env: &ParameterMap, input: Option<&mut dyn Read>) -> Result<Vec<u8>, Error> {
    let length = declared_content_length(env).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidContentLength,
            format!("Invalid CONTENT_LENGTH: {:?}", env.get("CONTENT_LENGTH")),
        )
    })?;

    let input = input.ok_or_else(|| {
        Error::new(ErrorKind::InvalidFilePointer, "POST request without an input stream")
    })?;

    let mut buffer = vec![0u8; length];
    input.read_exact(&mut buffer).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::new(
            ErrorKind::InvalidContentLength,
            format!("Input ended before CONTENT_LENGTH ({}) bytes were read", length),
        ),
        _ => Error::new(ErrorKind::Io, format!("Failed to read request body: {}", e)),
    })?;
    Ok(buffer)
}
