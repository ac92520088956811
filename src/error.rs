//! エラー型の定義

use std::fmt;
use std::panic::Location;

use thiserror::Error;

/// エラーの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// クエリ文字列が未設定のままパースされた
    QueryStringNotSet,
    /// 不正な%エスケープ
    InvalidHexSymbol,
    /// 環境変数が存在しない
    EnvVarNotFound,
    /// パラメータが存在しない
    ParamNotFound,
    /// POSTなのに入力ストリームが渡されていない
    InvalidFilePointer,
    /// CONTENT_LENGTHが正の整数でない、または読み込みが足りない
    InvalidContentLength,
    /// クッキーが存在しない
    CookieNotFound,
    /// 同名のクッキーが既に設定済み（Rejectポリシー時）
    CookieAlreadyPresent,
    /// リクエストモードのクッキージャーへの書き込み
    CookieRequestMode,
    /// POSTボディがバイナリとして保持されている
    PostIsBinary,
    /// POSTボディがバイナリではない
    PostIsNotBinary,
    /// レスポンスがバイナリモード
    ResponseIsBinary,
    /// レスポンスがテキストモード
    ResponseIsNotBinary,
    /// 読み取り専用セッションへの書き込み
    SessionRequestMode,
    /// セッションマネージャが既に存在する
    MoreThanOneSessionInstance,
    /// ヘッダー（Set-Cookieを含む）に使えない文字
    InvalidHeader,
    /// 入出力（リクエストボディの読み込み・レスポンスの書き込み）の失敗
    Io,
    /// 設定値エラー
    Configuration,
    /// セッション永続化層のエラー
    Persistence,
    /// リクエストボディが上限を超えている
    PayloadTooLarge,
    /// ハンドラがpanicした
    HandlerPanicked,
}

impl ErrorKind {
    /// 数値のエラーコードを取得
    pub fn code(&self) -> u16 {
        match self {
            ErrorKind::QueryStringNotSet => 1,
            ErrorKind::InvalidHexSymbol => 2,
            ErrorKind::EnvVarNotFound => 3,
            ErrorKind::ParamNotFound => 4,
            ErrorKind::InvalidFilePointer => 5,
            ErrorKind::InvalidContentLength => 6,
            ErrorKind::CookieNotFound => 7,
            ErrorKind::CookieAlreadyPresent => 8,
            ErrorKind::CookieRequestMode => 9,
            ErrorKind::PostIsBinary => 10,
            ErrorKind::PostIsNotBinary => 11,
            ErrorKind::ResponseIsBinary => 12,
            ErrorKind::ResponseIsNotBinary => 13,
            ErrorKind::SessionRequestMode => 14,
            ErrorKind::MoreThanOneSessionInstance => 15,
            ErrorKind::InvalidHeader => 16,
            ErrorKind::Io => 17,
            ErrorKind::Configuration => 18,
            ErrorKind::Persistence => 19,
            ErrorKind::PayloadTooLarge => 20,
            ErrorKind::HandlerPanicked => 21,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// アプリケーションのエラー型
///
/// メッセージ・種別（数値コード）・発生箇所を保持する。
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    location: Option<&'static Location<'static>>,
}

impl Error {
    /// 呼び出し元の位置を記録してエラーを作成
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Some(Location::caller()),
        }
    }

    /// 発生箇所を持たないエラーを作成
    pub fn without_location(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> u16 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 発生箇所（ファイル名と行番号）
    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }

    /// 指定した種別のエラーかどうか
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// ログ出力用の詳細メッセージ（発生箇所付き）
    pub fn detailed(&self) -> String {
        match self.location {
            Some(loc) => format!(
                "[{}] code {} on line #{} of file {}",
                self.message,
                self.code(),
                loc.line(),
                loc.file()
            ),
            None => format!("[{}] code {}", self.message, self.code()),
        }
    }

    /// エラーからHTTPステータスコードを取得
    pub fn status_code(&self) -> u16 {
        match self.kind {
            ErrorKind::QueryStringNotSet => 500,
            ErrorKind::InvalidHexSymbol => 400,
            ErrorKind::EnvVarNotFound => 500,
            ErrorKind::ParamNotFound => 400,
            ErrorKind::InvalidFilePointer => 500,
            ErrorKind::InvalidContentLength => 411,
            ErrorKind::CookieNotFound => 400,
            ErrorKind::CookieAlreadyPresent => 500,
            ErrorKind::CookieRequestMode => 500,
            ErrorKind::PostIsBinary => 415,
            ErrorKind::PostIsNotBinary => 415,
            ErrorKind::ResponseIsBinary => 500,
            ErrorKind::ResponseIsNotBinary => 500,
            ErrorKind::SessionRequestMode => 500,
            ErrorKind::MoreThanOneSessionInstance => 500,
            ErrorKind::InvalidHeader => 500,
            ErrorKind::Io => 400,
            ErrorKind::Configuration => 500,
            ErrorKind::Persistence => 502,
            ErrorKind::PayloadTooLarge => 413,
            ErrorKind::HandlerPanicked => 500,
        }
    }
}

impl PartialEq<ErrorKind> for Error {
    fn eq(&self, other: &ErrorKind) -> bool {
        self.kind == *other
    }
}
