//! 日志脱敏
//! 记录响应体或错误信息前去掉其中的令牌

use once_cell::sync::Lazy;
use regex::Regex;

/// 脱敏规则
struct SanitizeRule {
    pattern: Regex,
    replacement: &'static str,
}

static RULES: Lazy<Vec<SanitizeRule>> = Lazy::new(|| {
    vec![
        // Bearer 头
        SanitizeRule {
            pattern: Regex::new(r"(?i)(bearer)\s+[A-Za-z0-9._~+/=-]+").expect("valid regex"),
            replacement: "$1 ***",
        },
        // JSON 中的令牌字段
        SanitizeRule {
            pattern: Regex::new(r#"(?i)("(?:access|refresh)_?token"\s*:\s*)"[^"]*""#)
                .expect("valid regex"),
            replacement: r#"$1"***""#,
        },
        // 裸 JWT
        SanitizeRule {
            pattern: Regex::new(r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+")
                .expect("valid regex"),
            replacement: "eyJ***.***.***",
        },
        // 密码字段
        SanitizeRule {
            pattern: Regex::new(r#"(?i)("password"\s*:\s*)"[^"]*""#).expect("valid regex"),
            replacement: r#"$1"***""#,
        },
    ]
});

/// 脱敏输出
pub fn sanitize(text: &str) -> String {
    let mut result = text.to_string();
    for rule in RULES.iter() {
        result = rule.pattern.replace_all(&result, rule.replacement).into_owned();
    }
    result
}

/// 脱敏并截断，用于日志中的响应体
pub fn summarize(text: &str, max_chars: usize) -> String {
    let sanitized = sanitize(text);
    if sanitized.chars().count() > max_chars {
        let truncated: String = sanitized.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        sanitized
    }
}
