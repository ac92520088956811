//! CGIメイン実行ロジック

use std::env;
use std::io::{self, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::common::{Handler, SessionManager, SessionPersistence};
use crate::config::CgiConfig;
use crate::error::{Error, ErrorKind};
use super::error_logging::describe_request;
use super::request::{declared_content_length, is_post_method, parse_env, RequestContext};
use super::response::{reason_phrase, FinalizedResponse, ResponseBuilder};

/// リクエストごとにハンドラを呼び出すディスパッチャー
///
/// `SessionManager` を所有し、各リクエストの終わりに必ずセッションを破棄する。
/// 長時間動作するホストでも前のリクエストのセッションが残らない。
pub struct Dispatcher<P: SessionPersistence> {
    config: CgiConfig,
    sessions: SessionManager<P>,
}

impl<P: SessionPersistence> Dispatcher<P> {
    pub fn new(config: CgiConfig, persistence: P) -> Result<Self, Error> {
        let sessions = SessionManager::new(&config.session, persistence)?;
        Ok(Self { config, sessions })
    }

    pub fn config(&self) -> &CgiConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    /// 1リクエストを処理して `out` に書き出す
    ///
    /// ハンドラのエラーはステータス付きのテキストレスポンスになる。
    /// `out` への書き込みに失敗した場合だけ `Err` を返す。
    pub fn serve<I, S, H, W>(
        &mut self,
        env: I,
        input: Option<&mut dyn Read>,
        handler: &H,
        out: &mut W,
    ) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        H: Handler + ?Sized,
        W: Write,
    {
        let entries: Vec<String> = env.into_iter().map(|e| e.as_ref().to_string()).collect();
        let result = self.process(&entries, input, handler);

        // 成否に関わらずセッションを保存して破棄する
        if let Err(e) = self.sessions.destroy_instance() {
            error!("Failed to persist session: {}", e.detailed());
        }

        let wire = match result {
            Ok(response) => response.into_bytes(),
            Err(err) => {
                if err.is(ErrorKind::PayloadTooLarge) {
                    warn!("{}", err);
                } else {
                    error!("Error processing request: {}", err.detailed());
                    error!("{}", describe_request(&parse_env(&entries)));
                }
                error_response(&err)
            }
        };

        out.write_all(&wire)
            .and_then(|_| out.flush())
            .map_err(|e| Error::new(ErrorKind::Io, format!("Failed to write response: {}", e)))?;
        info!("CGI request processed ({} byte(s) written)", wire.len());
        Ok(())
    }

    fn process<H>(
        &mut self,
        entries: &[String],
        input: Option<&mut dyn Read>,
        handler: &H,
    ) -> Result<FinalizedResponse, Error>
    where
        H: Handler + ?Sized,
    {
        // POSTのみ、入力を読む前にボディサイズの上限を確認
        let env = parse_env(entries);
        if let Some(length) = declared_content_length(&env).filter(|_| is_post_method(&env)) {
            if length > self.config.max_body_size {
                return Err(Error::new(
                    ErrorKind::PayloadTooLarge,
                    format!(
                        "CONTENT_LENGTH {} exceeds the limit of {} bytes",
                        length, self.config.max_body_size
                    ),
                ));
            }
        }

        let request = RequestContext::new(entries, input, &mut self.sessions, &self.config)?;
        let mut response = ResponseBuilder::new(&request);
        debug!("Dispatching {:?} request", request.method());

        // ハンドラ内のpanicは500として扱う
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&request, &mut response)));
        match outcome {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::new(ErrorKind::HandlerPanicked, "panic occurred in handler"));
            }
        }

        response.finalize()
    }
}

/// エラーからプレーンテキストのエラーレスポンスを生成
pub fn error_response(err: &Error) -> Bytes {
    let status = err.status_code();
    let reason = reason_phrase(status);
    Bytes::from(format!(
        "Status: {} {}\r\nContent-Type: text/plain\r\n\r\n{}",
        status, reason, reason
    ))
}

/// 実際のプロセス環境・標準入力・標準出力で1リクエストを処理する
pub fn run_cgi<P, H>(config: CgiConfig, persistence: P, handler: &H) -> Result<(), Error>
where
    P: SessionPersistence,
    H: Handler + ?Sized,
{
    let entries: Vec<String> = env::vars_os()
        .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
        .collect();

    let mut dispatcher = Dispatcher::new(config, persistence)?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    dispatcher.serve(entries, Some(&mut input), handler, &mut out)
}
