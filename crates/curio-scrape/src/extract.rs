use curio_core::summary::truncate_chars;
use regex::Regex;

/// Hard cap on extracted content per page. Prompt assembly trims further.
pub const MAX_EXTRACT_CHARS: usize = 8_000;
const DENSE_PARAGRAPH_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub title: String,
    pub content: String,
}

/// Pull readable text out of an HTML page.
///
/// Extraction prefers, in order: dense paragraphs from the main content
/// region, all paragraphs joined, then the meta description. Returns empty
/// content when none of those produce text; callers degrade to the search
/// snippet in that case.
pub fn extract_text(html: &str) -> Extracted {
    let cleaned = strip_noise(html);
    let title = find_title(&cleaned).unwrap_or_default();
    let region = main_region(&cleaned).unwrap_or_else(|| cleaned.clone());

    let paragraphs = paragraph_texts(&region);
    let dense: Vec<&str> = paragraphs
        .iter()
        .map(String::as_str)
        .filter(|p| p.chars().count() >= DENSE_PARAGRAPH_CHARS)
        .collect();

    let content = if !dense.is_empty() {
        dense.join("\n\n")
    } else if !paragraphs.is_empty() {
        paragraphs.join(" ")
    } else {
        meta_description(&cleaned).unwrap_or_default()
    };

    Extracted {
        title,
        content: truncate_chars(content.trim(), MAX_EXTRACT_CHARS),
    }
}

fn strip_noise(html: &str) -> String {
    let mut out = html.to_string();
    for tag in ["script", "style", "noscript", "svg", "template", "iframe"] {
        out = strip_tag_blocks(&out, tag);
    }
    if let Ok(re) = Regex::new(r"(?s)<!--.*?-->") {
        out = re.replace_all(&out, " ").into_owned();
    }
    out
}

fn strip_tag_blocks(html: &str, tag: &str) -> String {
    match Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")) {
        Ok(re) => re.replace_all(html, " ").into_owned(),
        Err(_) => html.to_string(),
    }
}

fn find_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").ok()?;
    let captures = re.captures(html)?;
    let text = clean_fragment(captures.get(1)?.as_str());
    (!text.is_empty()).then_some(text)
}

/// Narrow extraction to `<main>`/`<article>` when present, or from an
/// `id="content"`-style marker onward. Paragraph filtering handles the tail.
fn main_region(html: &str) -> Option<String> {
    for pattern in [
        r"(?is)<main\b[^>]*>(.*?)</main\s*>",
        r"(?is)<article\b[^>]*>(.*?)</article\s*>",
    ] {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(m) = re.captures(html).and_then(|c| c.get(1)) {
                if !m.as_str().trim().is_empty() {
                    return Some(m.as_str().to_string());
                }
            }
        }
    }
    if let Ok(re) =
        Regex::new(r#"(?is)<[a-z][a-z0-9]*\b[^>]*\bid\s*=\s*["'](?:content|main-content|main)["']"#)
    {
        if let Some(m) = re.find(html) {
            return Some(html[m.start()..].to_string());
        }
    }
    None
}

fn paragraph_texts(html: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>") else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| clean_fragment(m.as_str()))
        .filter(|t| !t.is_empty())
        .collect()
}

fn meta_description(html: &str) -> Option<String> {
    for pattern in [
        r#"(?is)<meta\b[^>]*\bname\s*=\s*["']description["'][^>]*\bcontent\s*=\s*["']([^"']*)["']"#,
        r#"(?is)<meta\b[^>]*\bcontent\s*=\s*["']([^"']*)["'][^>]*\bname\s*=\s*["']description["']"#,
    ] {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(text) = re.captures(html).and_then(|c| c.get(1)) {
                let cleaned = collapse_whitespace(&decode_entities(text.as_str()));
                if !cleaned.is_empty() {
                    return Some(cleaned);
                }
            }
        }
    }
    None
}

fn clean_fragment(fragment: &str) -> String {
    let without_tags = match Regex::new(r"(?s)<[^>]*>") {
        Ok(re) => re.replace_all(fragment, " ").into_owned(),
        Err(_) => fragment.to_string(),
    };
    collapse_whitespace(&decode_entities(&without_tags))
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail[1..].find(';').map(|i| i + 1) {
            Some(semi) if semi > 1 && semi <= 10 => {
                let entity = &tail[1..semi];
                match decode_entity(entity) {
                    Some(decoded) => {
                        out.push_str(&decoded);
                        rest = &tail[semi + 1..];
                    }
                    None => {
                        out.push('&');
                        rest = &tail[1..];
                    }
                }
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<String> {
    let named = match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    };
    if let Some(ch) = named {
        return Some(ch.to_string());
    }
    let digits = entity.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code).map(|c| c.to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
