//! クエリ文字列（application/x-www-form-urlencoded）のパーサー

use log::debug;

use crate::error::{Error, ErrorKind};
use super::utils::percent_decode;
use super::ParameterMap;

fn is_delimiter(c: char) -> bool {
    matches!(c, '&' | '=' | ';')
}

fn is_pair_separator(c: char) -> bool {
    matches!(c, '&' | ';')
}

/// 区切り文字の連続を取り除く
///
/// - 区切り文字（`&` `=` `;`）の直前（出力済みの最後の文字）が区切り文字なら捨てる
/// - キーが空のペア（先頭またはペア区切りの直後に `=`）は次のペア区切りまで破棄する
/// - 先頭・末尾の区切り文字を削除する
///
/// 入力を一度だけ走査する。冪等: `sanitize(&sanitize(s)) == sanitize(s)`
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut skipping_pair = false;

    for c in raw.chars() {
        if skipping_pair {
            if !is_pair_separator(c) {
                continue;
            }
            skipping_pair = false;
        }

        if is_delimiter(c) {
            let prev = out.chars().next_back();

            // キーのないペアは丸ごと捨てる
            if c == '=' && prev.map_or(true, is_pair_separator) {
                skipping_pair = true;
                continue;
            }
            if prev.map_or(false, is_delimiter) {
                continue;
            }
        }
        out.push(c);
    }

    out.trim_matches(is_delimiter).to_string()
}

/// クエリ文字列パーサー
#[derive(Debug, Clone, Default)]
pub struct QueryStringParser {
    source: Option<String>,
    plus_as_space: bool,
}

impl QueryStringParser {
    /// ソース未設定のパーサーを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// ソースを指定してパーサーを作成
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            plus_as_space: false,
        }
    }

    /// `+` を空白としてデコードするかを設定
    pub fn plus_as_space(mut self, enabled: bool) -> Self {
        self.plus_as_space = enabled;
        self
    }

    pub fn set_source(&mut self, source: impl Into<String>) -> &mut Self {
        self.source = Some(source.into());
        self
    }

    /// 設定済みのソースを取得
    pub fn source(&self) -> Result<&str, Error> {
        self.source.as_deref().ok_or_else(|| {
            Error::new(
                ErrorKind::QueryStringNotSet,
                "Query string requested while it was never set",
            )
        })
    }

    /// ソース文字列をパースしてパラメータマップを返す
    ///
    /// `&` と `;` はどちらもペア区切りとして扱い、先に現れた方で区切る。
    /// 同じキーは後勝ち。
    pub fn parse(&self) -> Result<ParameterMap, Error> {
        let sanitized = sanitize(self.source()?);
        let mut params = ParameterMap::new();

        for pair in sanitized.split(is_pair_separator).filter(|p| !p.is_empty()) {
            let (key, value) = match pair.find('=') {
                Some(pos) => (&pair[..pos], &pair[pos + 1..]),
                None => (pair, ""),
            };

            let key = percent_decode(key, self.plus_as_space)?;
            let value = percent_decode(value, self.plus_as_space)?;
            params.insert(key, value);
        }

        debug!("Parsed {} parameter(s) from query string", params.len());
        Ok(params)
    }
}

/// クエリ文字列をパースする共通関数
pub fn parse_query_string(query_string: &str) -> Result<ParameterMap, Error> {
    QueryStringParser::with_source(query_string).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ParameterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("name=John&age=30&city=Tokyo").unwrap();
        assert_eq!(params, map(&[("name", "John"), ("age", "30"), ("city", "Tokyo")]));
    }

    #[test]
    fn test_parse_discards_malformed_trailing_pair() {
        let params = parse_query_string("a=b&c=d&e=f&g&=h==").unwrap();
        assert_eq!(params, map(&[("a", "b"), ("c", "d"), ("e", "f"), ("g", "")]));
    }

    #[test]
    fn test_parse_url_encoding() {
        let query = "name=%E3%81%82%E3%81%84&city=Tokyo%20Station&lang=ja%2Den&k%41y=v";
        let params = parse_query_string(query).unwrap();
        assert_eq!(params.get("name"), Some(&"あい".to_string()));
        assert_eq!(params.get("city"), Some(&"Tokyo Station".to_string()));
        assert_eq!(params.get("lang"), Some(&"ja-en".to_string()));
        assert_eq!(params.get("kAy"), Some(&"v".to_string()));
    }

    #[test]
    fn test_parse_malformed_escape_fails() {
        let err = parse_query_string("a=%zz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHexSymbol);
    }

    #[test]
    fn test_both_separators_accepted() {
        // `;` が `&` より先に現れても正しく区切られること
        let params = parse_query_string("a=1;b=2&c=3;d=4").unwrap();
        assert_eq!(params, map(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]));
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let params = parse_query_string("a=1&a=2&a=3").unwrap();
        assert_eq!(params.get("a"), Some(&"3".to_string()));
    }

    #[test]
    fn test_value_may_contain_equals_after_first() {
        let params = parse_query_string("expr=x%3Dy").unwrap();
        assert_eq!(params.get("expr"), Some(&"x=y".to_string()));
    }

    #[test]
    fn test_not_set() {
        let err = QueryStringParser::new().parse().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueryStringNotSet);

        let mut parser = QueryStringParser::new();
        parser.set_source("x=1");
        assert_eq!(parser.parse().unwrap().get("x"), Some(&"1".to_string()));
    }

    #[test]
    fn test_empty_source_yields_empty_map() {
        assert!(parse_query_string("").unwrap().is_empty());
        assert!(parse_query_string("&&;;==").unwrap().is_empty());
    }

    #[test]
    fn test_plus_as_space() {
        let parser = QueryStringParser::with_source("q=hello+world").plus_as_space(true);
        assert_eq!(parser.parse().unwrap().get("q"), Some(&"hello world".to_string()));
        let params = parse_query_string("q=hello+world").unwrap();
        assert_eq!(params.get("q"), Some(&"hello+world".to_string()));
    }

    #[test]
    fn test_sanitize_collapses_runs() {
        assert_eq!(sanitize("a==b"), "a=b");
        assert_eq!(sanitize("a=1&&&b=2"), "a=1&b=2");
        assert_eq!(sanitize("a=1&;b=2"), "a=1&b=2");
        assert_eq!(sanitize("&&a=1&"), "a=1");
        assert_eq!(sanitize("=x&a=1"), "a=1");
        assert_eq!(sanitize("a=b&c=d&e=f&g&=h=="), "a=b&c=d&e=f&g");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let samples = [
            "a=b&c=d&e=f&g&=h==",
            "==&&;;",
            "&=a&b",
            "x;=;y==z&&&",
            "k=v;;k2==v2&=&",
            "plain",
            "=",
            "a&=b=c;d",
            "日本=語&&;x",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_sanitize_idempotent_exhaustive_short_inputs() {
        let alphabet = ['a', 'b', '=', '&', ';'];
        let mut inputs = vec![String::new()];
        for _ in 0..5 {
            let next: Vec<String> = inputs
                .iter()
                .flat_map(|s| alphabet.iter().map(move |c| format!("{}{}", s, c)))
                .collect();
            for s in &next {
                let once = sanitize(s);
                assert_eq!(sanitize(&once), once, "not idempotent for {:?}", s);
            }
            inputs = next;
        }
    }

    #[test]
    fn test_large_delimiter_runs_parse_in_linear_time() {
        use std::time::{Duration, Instant};

        let started = Instant::now();

        let run = "&".repeat(2_000_000);
        assert_eq!(sanitize(&run), "");

        let body = format!("{}a=1{}b=2{}", run, ";".repeat(1_000_000), "=".repeat(1_000_000));
        let params = parse_query_string(&body).unwrap();
        assert_eq!(params, map(&[("a", "1"), ("b", "2")]));

        let pairs = "k&".repeat(1_000_000);
        let params = parse_query_string(&pairs).unwrap();
        assert_eq!(params, map(&[("k", "")]));

        assert!(
            started.elapsed() < Duration::from_secs(10),
            "parsing took {:?}",
            started.elapsed()
        );
    }
}
