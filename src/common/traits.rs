//! コアトレイト定義（Handler）

use crate::cgi::request::RequestContext;
use crate::cgi::response::ResponseBuilder;
use crate::error::Error;

/// ハンドラーの特性
pub trait Handler {
    /// リクエストを処理し、レスポンスに書き込む
    fn handle(&self, req: &RequestContext, res: &mut ResponseBuilder) -> Result<(), Error>;
}

impl<F> Handler for F
where
    F: Fn(&RequestContext, &mut ResponseBuilder) -> Result<(), Error>,
{
    fn handle(&self, req: &RequestContext, res: &mut ResponseBuilder) -> Result<(), Error> {
        self(req, res)
    }
}
