//! パーセントエンコーディングとヘッダー検証のユーティリティ関数群

use crate::error::{Error, ErrorKind};

/// エスケープ対象の予約文字（区切り文字・メタ文字）
const RESERVED: &[u8] = b"\"#$%&'+,/:;<=>?@[\\]^`{|}";

/// 16進数文字をバイト値に変換するヘルパー関数
fn from_hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn invalid_hex(token: &[u8]) -> Error {
    Error::new(
        ErrorKind::InvalidHexSymbol,
        format!(
            "Invalid HEX symbol found in escape {:?}",
            String::from_utf8_lossy(token)
        ),
    )
}

/// バイトがエスケープ対象かどうか
pub fn is_escaped(byte: u8) -> bool {
    byte <= 0x20 || byte >= 0x7f || RESERVED.contains(&byte)
}

/// `%XX` 形式（3文字）のトークンを1バイトにデコードする
///
/// 16進数は大文字小文字を区別しない。
pub fn decode_hex(token: &str) -> Result<u8, Error> {
    decode_hex_bytes(token.as_bytes())
}

fn decode_hex_bytes(token: &[u8]) -> Result<u8, Error> {
    match token {
        [b'%', hi, lo] => match (from_hex(*hi), from_hex(*lo)) {
            (Some(h), Some(l)) => Ok(h * 16 + l),
            _ => Err(invalid_hex(token)),
        },
        _ => Err(invalid_hex(token)),
    }
}

/// 1バイトを大文字の `%XX` に変換する
pub fn encode_hex(byte: u8) -> String {
    format!("%{:02X}", byte)
}

/// 文字列全体をパーセントエンコードする
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if is_escaped(b) {
            out.push_str(&encode_hex(b));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// パーセントエンコードされた文字列をデコードする
///
/// 不正・途中で途切れたエスケープは `InvalidHexSymbol` になる。
/// `plus_as_space` が真の場合は `+` を空白として扱う。
pub fn percent_decode(input: &str, plus_as_space: bool) -> Result<String, Error> {
    if !input.contains('%') && !(plus_as_space && input.contains('+')) {
        return Ok(input.to_string());
    }

    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let end = (i + 3).min(bytes.len());
                result.push(decode_hex_bytes(&bytes[i..end])?);
                i = end;
            }
            b'+' if plus_as_space => {
                result.push(b' ');
                i += 1;
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    Ok(String::from_utf8_lossy(&result).into_owned())
}

/// ヘッダー名が安全かどうか検証する（ASCII英数+ハイフンのみ）
pub fn is_valid_header_name(name: &str) -> bool {
    let b = name.as_bytes();
    !b.is_empty() && b.iter().all(|&c| c.is_ascii_alphanumeric() || c == b'-')
}

/// ヘッダー値が安全かどうか検証する（ASCIIのホワイトリスト）
/// 許可: HTAB(0x09), SP(0x20), 可視ASCII(0x21–0x7E)
pub fn is_valid_header_value(value: &str) -> bool {
    value
        .as_bytes()
        .iter()
        .all(|&c| c == b'\t' || c == b' ' || (0x21..=0x7e).contains(&c))
}

/// Cookie名が安全なトークンか（RFC6265準拠の簡易版）
pub fn is_cookie_name_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    const FORBIDDEN: &[char] = &['(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}', ' ', '\t'];
    name.chars().all(|c| c.is_ascii() && !c.is_ascii_control() && !FORBIDDEN.contains(&c))
}

/// Cookie値が安全か（RFC6265 cookie-octetの簡易版）
/// 許容: 0x21, 0x23-0x2B, 0x2D-0x3A, 0x3C-0x5B, 0x5D-0x7E
pub fn is_cookie_value_valid(value: &str) -> bool {
    value.chars().all(|c| {
        matches!(c as u32,
            0x21 |
            0x23..=0x2B |
            0x2D..=0x3A |
            0x3C..=0x5B |
            0x5D..=0x7E
        )
    })
}

/// ヘッダー名・値を検証し、不正ならInvalidHeaderを返す
pub fn validate_header(name: &str, value: &str) -> Result<(), Error> {
    if !is_valid_header_name(name) {
        return Err(Error::new(
            ErrorKind::InvalidHeader,
            format!("header name {:?} contains invalid characters", name),
        ));
    }
    validate_header_value(value)
}

/// ヘッダー値を検証する
pub fn validate_header_value(value: &str) -> Result<(), Error> {
    if is_valid_header_value(value) {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::InvalidHeader,
            "header value contains control/CRLF or invalid chars",
        ))
    }
}

/// Cookie名/値を検証する
pub fn validate_cookie_name_value(name: &str, value: &str) -> Result<(), Error> {
    if !is_cookie_name_valid(name) {
        return Err(Error::new(
            ErrorKind::InvalidHeader,
            format!("cookie name {:?} contains invalid characters", name),
        ));
    }
    if !is_cookie_value_valid(value) {
        return Err(Error::new(
            ErrorKind::InvalidHeader,
            format!("value of cookie {} contains invalid characters", name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("%41").unwrap(), 0x41);
        assert_eq!(decode_hex("%ff").unwrap(), 0xff);
        assert_eq!(decode_hex("%Ff").unwrap(), 0xff);
        assert_eq!(decode_hex("%00").unwrap(), 0);
    }

    #[test]
    fn test_decode_hex_rejects_invalid() {
        for bad in ["%zz", "%4", "%4g", "41", "%411", "", "A41"] {
            let err = decode_hex(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidHexSymbol, "input {:?}", bad);
        }
    }

    #[test]
    fn test_encode_hex_uppercase() {
        assert_eq!(encode_hex(0x0a), "%0A");
        assert_eq!(encode_hex(0xfe), "%FE");
        assert_eq!(encode_hex(b' '), "%20");
    }

    #[test]
    fn test_hex_round_trip_over_escaped_set() {
        for b in 0u8..=255 {
            if is_escaped(b) {
                assert_eq!(decode_hex(&encode_hex(b)).unwrap(), b);
            }
        }
    }

    #[test]
    fn test_escaped_set() {
        for b in [0x00, 0x1f, 0x20, 0x7f, 0x80, 0xff] {
            assert!(is_escaped(b));
        }
        for &b in b"\"$&'+,/:;<=>?@[]^`{|}" {
            assert!(is_escaped(b), "{} should be escaped", b as char);
        }
        for &b in b"azAZ09-_.~!*()" {
            assert!(!is_escaped(b), "{} should not be escaped", b as char);
        }
    }

    #[test]
    fn test_percent_encode_does_not_rescan_escapes() {
        assert_eq!(percent_encode("a b&c"), "a%20b%26c");
        assert_eq!(percent_encode("%"), "%25");
        assert_eq!(percent_encode("100%+"), "100%25%2B");
        assert_eq!(percent_encode("plain"), "plain");
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("Hello%20World", false).unwrap(), "Hello World");
        assert_eq!(percent_decode("test%2Bvalue", false).unwrap(), "test+value");
        assert_eq!(percent_decode("plus+space", false).unwrap(), "plus+space");
        assert_eq!(percent_decode("plus+space", true).unwrap(), "plus space");
        assert_eq!(
            percent_decode("%E3%81%82%E3%81%84%E3%81%86", false).unwrap(),
            "あいう"
        );
    }

    #[test]
    fn test_percent_decode_rejects_truncated_escape() {
        assert_eq!(
            percent_decode("abc%4", false).unwrap_err().kind(),
            ErrorKind::InvalidHexSymbol
        );
        assert_eq!(
            percent_decode("%zzabc", false).unwrap_err().kind(),
            ErrorKind::InvalidHexSymbol
        );
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for s in ["a=b&c=d", "日本語 テキスト", "100% sure?", "x;y|z\\w#"] {
            assert_eq!(percent_decode(&percent_encode(s), false).unwrap(), s);
        }
    }

    #[test]
    fn test_header_and_cookie_validation() {
        assert!(is_valid_header_name("X-Custom-Header"));
        assert!(!is_valid_header_name(""));
        assert!(!is_valid_header_name("X:Bad"));
        assert!(is_valid_header_value("text/html; charset=utf-8"));
        assert!(!is_valid_header_value("a\nb"));
        assert!(is_cookie_name_valid("sess_id"));
        assert!(!is_cookie_name_valid("a=b"));
        assert!(!is_cookie_name_valid("bad name"));
        assert!(is_cookie_value_valid("abc-123"));
        assert!(!is_cookie_value_valid("a b"));

        assert!(validate_header("X-Test", "ok").is_ok());
        assert_eq!(validate_header("X-Test", "ok\r\nX: y").unwrap_err().kind(), ErrorKind::InvalidHeader);
        assert_eq!(validate_cookie_name_value("a;b", "v").unwrap_err().kind(), ErrorKind::InvalidHeader);
        assert_eq!(validate_cookie_name_value("a", "v;w").unwrap_err().kind(), ErrorKind::InvalidHeader);
    }
}
