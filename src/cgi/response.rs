//! CGIレスポンスの組み立てと出力

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;

use crate::common::{CookieJar, CookieRecord, ParameterMap, SessionHandle};
use crate::error::{Error, ErrorKind};
use super::request::RequestContext;
use crate::common::utils::{validate_cookie_name_value, validate_header};

/// ステータスコードに対応するReason Phrase
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        411 => "Length Required",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone)]
enum Body {
    Text(String),
    Binary(Bytes),
}

/// レスポンスを組み立てる
///
/// ヘッダー・クッキー・セッション・本文を保持し、`finalize` で出力用の値に変換する。
#[derive(Debug)]
pub struct ResponseBuilder {
    headers: ParameterMap,
    cookies: CookieJar,
    session: SessionHandle,
    body: Body,
    secure: bool,
    cookie_domain: Option<String>,
    session_cookie_name: String,
}

impl ResponseBuilder {
    /// リクエストに紐づくレスポンスを作成
    pub fn new(request: &RequestContext) -> Self {
        let mut headers = ParameterMap::new();
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        headers.insert("Content-Encoding".to_string(), "utf-8".to_string());

        Self {
            headers,
            cookies: CookieJar::with_policy(request.duplicate_policy()),
            session: request.session().clone(),
            body: Body::Text(String::new()),
            secure: request.is_https(),
            cookie_domain: request.cookie_domain(),
            session_cookie_name: request.session_cookie_name().to_string(),
        }
    }

    /// ヘッダーを設定（同名は上書き）
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<&mut Self, Error> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// ヘッダーを取得
    pub fn get_header(&self, name: &str) -> Result<&str, Error> {
        self.headers.get(name).map(String::as_str).ok_or_else(|| {
            Error::new(ErrorKind::ParamNotFound, format!("Header {} not set", name))
        })
    }

    pub fn headers(&self) -> &ParameterMap {
        &self.headers
    }

    /// `Status` ヘッダーを設定
    pub fn set_status(&mut self, status: u16) -> Result<&mut Self, Error> {
        self.set_header("Status", format!("{} {}", status, reason_phrase(status)))
    }

    /// 送信するクッキーを設定
    pub fn set_cookie(&mut self, name: impl Into<String>, record: CookieRecord) -> Result<(), Error> {
        self.cookies.set_cookie(name, record)
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// セッション変数を設定（セッションが無ければ作成される）
    pub fn set_session_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        self.session.set_param(name, value)
    }

    pub fn get_session_param(&self, name: &str) -> Result<String, Error> {
        self.session.get_param(name)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// テキスト本文に追記
    pub fn append_body(&mut self, text: &str) -> Result<&mut Self, Error> {
        match &mut self.body {
            Body::Text(body) => {
                body.push_str(text);
                Ok(self)
            }
            Body::Binary(_) => Err(Error::new(
                ErrorKind::ResponseIsBinary,
                "Cannot append text to a binary response",
            )),
        }
    }

    /// バイナリ本文を設定する
    ///
    /// 以降このレスポンスはバイナリのまま。テキスト本文は破棄される。
    pub fn set_binary_body(&mut self, data: impl Into<Bytes>) -> &mut Self {
        self.body = Body::Binary(data.into());
        self
    }

    /// 本文を空にする（モードは変えない）
    pub fn clear_body(&mut self) {
        match &mut self.body {
            Body::Text(body) => body.clear(),
            Body::Binary(data) => *data = Bytes::new(),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.body, Body::Binary(_))
    }

    /// ヘッダーブロックを組み立てる
    fn header_block(&self) -> Result<String, Error> {
        let mut block = String::new();
        let domain = self.cookie_domain.as_deref();

        for (name, record) in self.cookies.iter() {
            block.push_str("Set-Cookie: ");
            block.push_str(&record.to_header_value(name, domain, self.secure));
            block.push_str("\r\n");
        }

        // アプリが同名のクッキーを設定していなければセッションクッキーを付ける
        if let Some(session) = self.session.snapshot() {
            if !self.cookies.contains(&self.session_cookie_name) {
                validate_cookie_name_value(&self.session_cookie_name, &session.id)?;
                let record = CookieRecord::new(session.id)
                    .with_expire_epoch(session.expire)
                    .http_only(true);
                block.push_str("Set-Cookie: ");
                block.push_str(&record.to_header_value(&self.session_cookie_name, domain, self.secure));
                block.push_str("\r\n");
            }
        }

        for (name, value) in &self.headers {
            validate_header(name, value)?;
            block.push_str(name);
            block.push_str(": ");
            block.push_str(value);
            block.push_str("\r\n");
        }
        block.push_str("\r\n");
        Ok(block)
    }

    /// 出力用のレスポンスに変換する
    pub fn finalize(self) -> Result<FinalizedResponse, Error> {
        let header = self.header_block()?;
        let header_len = header.len();

        let wire = match self.body {
            Body::Text(body) => {
                let mut text = header;
                text.push_str(&body);
                Wire::Text(text)
            }
            Body::Binary(payload) => {
                let mut buf = BytesMut::with_capacity(header_len + payload.len());
                buf.put_slice(header.as_bytes());
                buf.put_slice(&payload);
                Wire::Binary(buf.freeze())
            }
        };

        let finalized = FinalizedResponse { wire, header_len };
        debug!(
            "Finalized {} response: {} header byte(s), {} total",
            if finalized.is_binary() { "binary" } else { "text" },
            header_len,
            finalized.len()
        );
        Ok(finalized)
    }
}

#[derive(Debug, Clone)]
enum Wire {
    Text(String),
    Binary(Bytes),
}

/// 出力可能になったレスポンス
#[derive(Debug, Clone)]
pub struct FinalizedResponse {
    wire: Wire,
    header_len: usize,
}

impl FinalizedResponse {
    pub fn is_binary(&self) -> bool {
        matches!(self.wire, Wire::Binary(_))
    }

    /// ヘッダー＋本文の文字列（テキストのみ）
    pub fn complete_body(&self) -> Result<&str, Error> {
        match &self.wire {
            Wire::Text(text) => Ok(text),
            Wire::Binary(_) => Err(Error::new(
                ErrorKind::ResponseIsBinary,
                "Response is binary; use binary_body instead",
            )),
        }
    }

    /// ヘッダー＋本文のバイト列（バイナリのみ）
    pub fn binary_body(&self) -> Result<&[u8], Error> {
        match &self.wire {
            Wire::Binary(data) => Ok(data),
            Wire::Text(_) => Err(Error::new(
                ErrorKind::ResponseIsNotBinary,
                "Response is text; use complete_body instead",
            )),
        }
    }

    /// モードに関わらず出力するバイト列
    pub fn as_bytes(&self) -> &[u8] {
        match &self.wire {
            Wire::Text(text) => text.as_bytes(),
            Wire::Binary(data) => data,
        }
    }

    /// ヘッダーブロックの長さ（終端の空行を含む）
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn header(&self) -> &[u8] {
        &self.as_bytes()[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.as_bytes()[self.header_len..]
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Bytes {
        match self.wire {
            Wire::Text(text) => Bytes::from(text),
            Wire::Binary(data) => data,
        }
    }
}
