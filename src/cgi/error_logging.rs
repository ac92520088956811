//! エラーログ用のリクエスト情報（機密値はマスク）

use crate::common::ParameterMap;

const REDACTED: &str = "***redacted***";
const MAX_LOGGED_VALUE: usize = 200;

/// エラー時にログへ出すCGI環境の要約を構築
pub fn describe_request(env: &ParameterMap) -> String {
    let mut lines = Vec::new();
    lines.push("CGI request context:".to_string());

    let basic_vars = [
        "REQUEST_METHOD",
        "PATH_INFO",
        "QUERY_STRING",
        "CONTENT_TYPE",
        "CONTENT_LENGTH",
        "SERVER_PROTOCOL",
        "SERVER_NAME",
        "REMOTE_ADDR",
        "HTTPS",
    ];
    for key in basic_vars.iter() {
        if let Some(val) = env.get(*key) {
            lines.push(format!("  {}={}", key, redact_value_for_log(key, val)));
        }
    }

    lines.push("  HTTP headers:".to_string());
    let mut header_count = 0;
    for (key, val) in env.iter().filter(|(k, _)| k.starts_with("HTTP_")) {
        lines.push(format!("    {}={}", key, redact_value_for_log(key, val)));
        header_count += 1;
    }
    if header_count == 0 {
        lines.push("    (none)".to_string());
    }

    lines.join("\n")
}

/// ログに出す値を整形する（機密キーはマスク、長い値は切り詰め）
pub fn redact_value_for_log(key: &str, value: &str) -> String {
    let key_l = key.to_ascii_lowercase();
    if key_l == "query_string" {
        return redact_query_string(value);
    }
    if is_sensitive_key_like(&key_l) {
        return REDACTED.to_string();
    }
    truncate_for_log(value)
}

pub fn is_sensitive_key_like(lower_key: &str) -> bool {
    let patterns = [
        "authorization",
        "cookie",
        "token",
        "secret",
        "password",
        "pass",
        "api-key",
        "api_key",
        "apikey",
        "jwt",
        "auth",
        "sess",
        "csrf",
        "signature",
        "private",
        "key",
        "credential",
        "bearer",
    ];
    patterns.iter().any(|p| lower_key.contains(p))
}

/// クエリ文字列中の機密パラメータをマスクする（`&` と `;` の両方で区切る）
pub fn redact_query_string(qs: &str) -> String {
    if qs.is_empty() {
        return String::new();
    }
    let mut out_parts = Vec::new();
    for part in qs.split(|c| c == '&' || c == ';') {
        if part.is_empty() {
            continue;
        }
        let (k, v) = match part.find('=') {
            Some(pos) => (&part[..pos], &part[pos + 1..]),
            None => (part, ""),
        };
        if is_sensitive_key_like(&k.to_ascii_lowercase()) {
            out_parts.push(format!("{}={}", k, REDACTED));
        } else {
            out_parts.push(format!("{}={}", k, truncate_for_log(v)));
        }
    }
    out_parts.join("&")
}

fn truncate_for_log(value: &str) -> String {
    if value.len() <= MAX_LOGGED_VALUE {
        return value.to_string();
    }
    let mut end = MAX_LOGGED_VALUE;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &value[..end])
}
