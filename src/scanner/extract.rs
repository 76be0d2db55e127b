use scraper::{ElementRef, Html, Node, Selector};

/// Pages yielding less visible text than this are treated as failed crawls.
pub const MIN_CONTENT_CHARS: usize = 100;

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "aside", "iframe", "svg", "form",
    "template", "button",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "li", "ul", "ol", "table", "tr", "br", "h1", "h2",
    "h3", "h4", "h5", "h6", "blockquote", "pre", "dd", "dt",
];

const NOISE_MARKERS: &[&str] = &["advert", "cookie", "consent", "gdpr", "popup", "modal", "banner"];

fn is_noise_token(token: &str) -> bool {
    let token = token.to_ascii_lowercase();
    matches!(token.as_str(), "ad" | "ads" | "adsbygoogle" | "sponsored")
        || token.starts_with("ad-")
        || token.starts_with("ads-")
        || NOISE_MARKERS.iter().any(|marker| token.contains(marker))
}

fn is_skipped(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    if SKIPPED_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("aria-hidden") == Some("true") || value.attr("hidden").is_some() {
        return true;
    }
    value.id().is_some_and(is_noise_token) || value.classes().any(is_noise_token)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    if !out.is_empty() && !out.ends_with(['\n', ' ']) {
                        out.push(' ');
                    }
                    out.push_str(text);
                }
            }
            Node::Element(_) => {
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_skipped(&child_element) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&child_element.value().name());
                if block && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
                collect_text(child_element, out);
                if block && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Visible text of a page with chrome, scripts and ad/cookie furniture removed.
pub fn extract_visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut raw = String::new();
    collect_text(root, &mut raw);

    let title = Selector::parse("title")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .map(|title| title.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty());

    let body = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    match title {
        Some(title) if !body.starts_with(&title) => format!("{title}\n{body}"),
        _ => body,
    }
}

pub fn has_enough_content(text: &str) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CONTENT_CHARS
}
