//! Minimal reader for `| display xml` replies.
//!
//! JunOS RPC replies are flat enough that the prober only ever needs the
//! text of a leaf element by name. Namespaced tags (`junos:comment`) and
//! attributes are tolerated; nesting, CDATA and anything unknown are not
//! interpreted.

use regex::Regex;

/// Text of the first `<tag>...</tag>` leaf, entity-decoded and trimmed.
///
/// `None` when the tag is absent, empty, or contains child elements.
pub fn first_text(xml: &str, tag: &str) -> Option<String> {
    leaf_pattern(tag)?
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .find(|text| !text.is_empty())
}

/// Text of every `<tag>` leaf, in document order.
pub fn all_text(xml: &str, tag: &str) -> Vec<String> {
    let Some(pattern) = leaf_pattern(tag) else {
        return Vec::new();
    };
    pattern
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .collect()
}

/// Contents of the first `<tag ...>...</tag>` element, children included.
pub fn element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let tag = regex::escape(tag);
    let pattern = Regex::new(&format!(
        r"(?s)<(?:[\w\-]+:)?{tag}(?:\s[^>]*)?>(.*?)</(?:[\w\-]+:)?{tag}>"
    ))
    .ok()?;
    pattern.captures(xml)?.get(1).map(|m| m.as_str())
}

/// Whether the text looks like an RPC reply at all.
pub fn is_rpc_reply(text: &str) -> bool {
    text.contains("<rpc-reply")
}

fn leaf_pattern(tag: &str) -> Option<Regex> {
    let tag = regex::escape(tag);
    Regex::new(&format!(
        r"<(?:[\w\-]+:)?{tag}(?:\s[^>]*)?>([^<]*)</(?:[\w\-]+:)?{tag}>"
    ))
    .ok()
}

fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"<rpc-reply xmlns:junos="http://xml.juniper.net/junos/21.4R0/junos">
    <software-information>
        <host-name>r1</host-name>
        <product-model>
            mx204
        </product-model>
        <junos-version></junos-version>
        <package-information>
            <name>junos</name>
            <comment>JUNOS Software Release [21.4R3.15]</comment>
        </package-information>
        <package-information>
            <name>jpfe</name>
            <comment>JUNOS PFE &amp; microcode [21.4R3.15]</comment>
        </package-information>
    </software-information>
    <junos:comment junos:style="brief">note</junos:comment>
</rpc-reply>"#;

    #[test]
    fn test_first_text() {
        assert_eq!(first_text(REPLY, "host-name").as_deref(), Some("r1"));
        assert_eq!(first_text(REPLY, "product-model").as_deref(), Some("mx204"));
        assert_eq!(first_text(REPLY, "architecture"), None);
    }

    #[test]
    fn test_empty_leaf_is_missing() {
        assert_eq!(first_text(REPLY, "junos-version"), None);
    }

    #[test]
    fn test_element_with_children_is_not_a_leaf() {
        assert_eq!(first_text(REPLY, "package-information"), None);
        let block = element(REPLY, "package-information").unwrap();
        assert!(block.contains("<name>junos</name>"));
    }

    #[test]
    fn test_all_text_and_entities() {
        assert_eq!(
            all_text(REPLY, "comment"),
            vec![
                "JUNOS Software Release [21.4R3.15]",
                "JUNOS PFE & microcode [21.4R3.15]",
                "note",
            ]
        );
    }

    #[test]
    fn test_is_rpc_reply() {
        assert!(is_rpc_reply(REPLY));
        assert!(!is_rpc_reply("error: syntax error"));
    }
}
