use markurl_engine::markdown::MarkdownConverter;
use markurl_engine::{decode_html, Extractor, ReadabilityLikeExtractor};
use pretty_assertions::assert_eq;

#[test]
fn decode_respects_charset_header() {
    let bytes = b"caf\xe9"; // iso-8859-1
    let decoded = decode_html(bytes, Some("text/html; charset=ISO-8859-1")).unwrap();
    assert_eq!(decoded.html, "caf\u{e9}");
    assert!(
        decoded.encoding_label.eq_ignore_ascii_case("ISO-8859-1")
            || decoded.encoding_label.eq_ignore_ascii_case("windows-1252")
    );
}

#[test]
fn decode_handles_utf8_bom() {
    let bytes = b"\xEF\xBB\xBFhello";
    let decoded = decode_html(bytes, Some("text/html")).unwrap();
    assert_eq!(decoded.html, "hello");
    assert_eq!(decoded.encoding_label, "UTF-8");
}

#[test]
fn extractor_prefers_article_then_body() {
    let html = r#"
    <html><head><title>Title</title></head>
    <body>
        <nav>menu</nav>
        <article><h1>Heading</h1><p>Body text</p></article>
    </body></html>
    "#;
    let extracted = ReadabilityLikeExtractor.extract(html);
    assert_eq!(extracted.title.as_deref(), Some("Title"));
    assert!(extracted.content_html.contains("Heading"));
    assert!(extracted.content_html.contains("Body text"));
    assert!(!extracted.content_html.contains("menu"));
}

#[test]
fn pipeline_decode_extract_convert_is_deterministic() {
    let bytes = br#"<html><head><title>X</title></head><body><article><h1>Hello</h1><p>A</p><p>B</p></article></body></html>"#;
    let decoded = decode_html(bytes, Some("text/html; charset=utf-8")).unwrap();
    let extracted = ReadabilityLikeExtractor.extract(&decoded.html);
    let md = MarkdownConverter::new().convert_html(&extracted.content_html);
    assert_eq!(md.trim(), "# Hello\n\nA\n\nB");
}
