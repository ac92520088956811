//! CGI環境でのエントリポイント
//!
//! セッションの訪問回数カウンタとパラメータのエコーを返すサンプルプログラム

use env_logger::Env;
use log::{error, info};

use cgibridge::{
    run_cgi, CgiConfig, Error, ErrorKind, MemorySessionStore, RequestContext, ResponseBuilder,
    Sources,
};

/// 訪問回数を数え、受け取ったパラメータをそのまま表示する
fn demo_handler(req: &RequestContext, res: &mut ResponseBuilder) -> Result<(), Error> {
    let visits = match req.session().get_param("visits") {
        Ok(v) => v.parse::<u64>().unwrap_or(0) + 1,
        Err(e) if e.is(ErrorKind::ParamNotFound) => 1,
        Err(e) => return Err(e),
    };
    res.set_session_param("visits", visits.to_string())?;

    if req.is_post_binary() {
        let body = req.get_bin_post()?;
        res.set_header("Content-Type", "application/octet-stream")?;
        res.set_binary_body(body.clone());
        return Ok(());
    }

    res.set_header("Content-Type", "text/plain; charset=utf-8")?;
    res.append_body(&format!("visits: {}\n", visits))?;
    for (name, value) in req.get_data(Sources::GET | Sources::POST)? {
        res.append_body(&format!("{} = {}\n", name, value))?;
    }
    Ok(())
}

fn main() {
    // CGIでは標準出力がHTTPレスポンスとなるため、ログは標準エラー出力に出力する
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("Starting cgibridge demo");

    let config = CgiConfig::from_env();
    if let Err(err) = run_cgi(config, MemorySessionStore::new(), &demo_handler) {
        error!("Error running CGI application: {}", err.detailed());
        std::process::exit(1);
    }
}
