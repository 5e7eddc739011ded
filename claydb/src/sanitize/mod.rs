use regex::Regex;
use std::sync::OnceLock;

fn container_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
            .expect("container pattern")
    })
}

fn comment_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"))
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9-]*)((?:"[^"]*"|'[^']*'|[^>"'])*)>"#)
            .expect("tag pattern")
    })
}

fn attr_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([a-zA-Z][a-zA-Z0-9-]*)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s"'>]+))?"#)
            .expect("attribute pattern")
    })
}

/// Allow-list HTML rewriter for rich-text fields. Tags outside the allow
/// list are removed while their inner text is kept; `script` and `style`
/// lose their content as well. Kept tags are re-emitted in a normalized
/// form, so sanitizing already-sanitized markup is a fixpoint.
#[derive(Debug, Clone)]
pub struct HtmlPolicy {
    allowed_tags: Vec<String>,
    allowed_attributes: Vec<String>,
}

impl HtmlPolicy {
    pub fn new(tags: &[&str], attributes: &[&str]) -> Self {
        HtmlPolicy {
            allowed_tags: tags.iter().map(|t| t.to_lowercase()).collect(),
            allowed_attributes: attributes.iter().map(|a| a.to_lowercase()).collect(),
        }
    }

    pub fn allowed_tags(&self) -> &[String] {
        &self.allowed_tags
    }

    pub fn allowed_attributes(&self) -> &[String] {
        &self.allowed_attributes
    }

    /// Rewrite `input`, keeping only allowed tags and attributes.
    pub fn sanitize(&self, input: &str) -> String {
        let stripped = container_pattern().replace_all(input, "");
        let stripped = comment_pattern().replace_all(&stripped, "");
        tag_pattern()
            .replace_all(&stripped, |caps: &regex::Captures| self.rewrite_tag(caps))
            .into_owned()
    }

    /// True when `input` is already in sanitized form.
    pub fn is_clean(&self, input: &str) -> bool {
        self.sanitize(input) == input
    }

    fn rewrite_tag(&self, caps: &regex::Captures) -> String {
        let name = caps[2].to_lowercase();
        if !self.allowed_tags.contains(&name) {
            return String::new();
        }
        if !caps[1].is_empty() {
            return format!("</{name}>");
        }

        let body = &caps[3];
        let mut tag = format!("<{name}");
        for attr in attr_pattern().captures_iter(body) {
            let key = attr[1].to_lowercase();
            if !self.allowed_attributes.contains(&key) {
                continue;
            }
            let value = unquote(attr.get(2).map_or("", |m| m.as_str()));
            if has_unsafe_scheme(&key, value) {
                continue;
            }
            let value = value.replace('"', "&quot;");
            tag.push_str(&format!(" {key}=\"{value}\""));
        }

        if body.trim_end().ends_with('/') {
            tag.push_str(" />");
        } else {
            tag.push('>');
        }
        tag
    }
}

impl Default for HtmlPolicy {
    fn default() -> Self {
        HtmlPolicy::new(
            &[
                "a", "b", "i", "em", "strong", "u", "s", "p", "br", "hr", "ul", "ol", "li",
                "blockquote", "pre", "code", "h1", "h2", "h3", "h4", "h5", "h6", "img", "span",
                "table", "thead", "tbody", "tr", "th", "td",
            ],
            &["href", "src", "alt", "title", "class"],
        )
    }
}

fn unquote(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if raw.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[raw.len() - 1] == first {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

fn has_unsafe_scheme(key: &str, value: &str) -> bool {
    if key != "href" && key != "src" {
        return false;
    }
    let compact: String = value
        .chars()
        .filter(|c| !c.is_ascii_control() && !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_disallowed_tag_dropped_text_kept() {
        let policy = HtmlPolicy::default();
        assert_eq!(
            policy.sanitize("<p>hello <marquee>world</marquee></p>"),
            "<p>hello world</p>"
        );
    }

    #[test]
    fn test_script_loses_its_content() {
        let policy = HtmlPolicy::default();
        assert_eq!(
            policy.sanitize("before<script>alert('x')</script>after"),
            "beforeafter"
        );
        assert_eq!(policy.sanitize("<style>p { color: red }</style>ok"), "ok");
    }

    #[test]
    fn test_comments_are_stripped() {
        let policy = HtmlPolicy::default();
        assert_eq!(policy.sanitize("a<!-- secret -->b"), "ab");
    }

    #[test]
    fn test_disallowed_attributes_dropped() {
        let policy = HtmlPolicy::default();
        assert_eq!(
            policy.sanitize(r#"<a href="/x" onclick="steal()">link</a>"#),
            r#"<a href="/x">link</a>"#
        );
    }

    #[test]
    fn test_javascript_scheme_dropped() {
        let policy = HtmlPolicy::default();
        assert_eq!(
            policy.sanitize(r#"<a href="javascript:alert(1)">x</a>"#),
            "<a>x</a>"
        );
        assert_eq!(
            policy.sanitize(r#"<a href=" JAVA SCRIPT: alert(1)">x</a>"#),
            "<a>x</a>"
        );
    }

    #[test]
    fn test_attribute_quoting_normalized() {
        let policy = HtmlPolicy::default();
        assert_eq!(
            policy.sanitize("<img src='cat.png' alt=photo>"),
            r#"<img src="cat.png" alt="photo">"#
        );
    }

    #[test]
    fn test_self_closing_preserved() {
        let policy = HtmlPolicy::default();
        assert_eq!(policy.sanitize("<br/>"), "<br />");
        assert_eq!(policy.sanitize("<br />"), "<br />");
    }

    #[test]
    fn test_tag_names_lowercased() {
        let policy = HtmlPolicy::default();
        assert_eq!(policy.sanitize("<B>bold</B>"), "<b>bold</b>");
    }

    #[test]
    fn test_sanitize_is_a_fixpoint() {
        let policy = HtmlPolicy::default();
        let messy = r#"<P Class="intro" onclick=hack()>Hi <EM>there</EM><script>bad()</script></P>"#;
        let once = policy.sanitize(messy);
        let twice = policy.sanitize(&once);
        assert_eq!(once, twice);
        assert!(policy.is_clean(&once));
    }

    #[test]
    fn test_is_clean_on_clean_fragment() {
        let policy = HtmlPolicy::default();
        assert!(policy.is_clean(r#"<p>hello <a href="/about">about</a></p>"#));
        assert!(!policy.is_clean("<p onclick=\"x\">hello</p>"));
    }

    #[test]
    fn test_custom_allow_list() {
        let policy = HtmlPolicy::new(&["b"], &[]);
        assert_eq!(
            policy.sanitize(r#"<p><b class="x">bold</b></p>"#),
            "<b>bold</b>"
        );
    }

    #[test]
    fn test_plain_text_untouched() {
        let policy = HtmlPolicy::default();
        assert_eq!(policy.sanitize("2 < 3 and 5 > 4"), "2 < 3 and 5 > 4");
    }

    #[test]
    fn test_embedded_double_quote_escaped() {
        let policy = HtmlPolicy::default();
        let once = policy.sanitize(r#"<a title='say "hi"'>x</a>"#);
        assert_eq!(once, r#"<a title="say &quot;hi&quot;">x</a>"#);
        assert_eq!(policy.sanitize(&once), once);
    }
}
