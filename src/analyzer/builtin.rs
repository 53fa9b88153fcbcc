use crate::analyzer::{Analyzer, Finding, Severity};
use crate::state::PageResult;
use scraper::{Html, Selector};
use serde_json::json;

/// Turns missing or invalid security headers into findings
pub struct SecurityHeaderAnalyzer;

impl Analyzer for SecurityHeaderAnalyzer {
    fn name(&self) -> &str {
        "security_headers"
    }

    fn analyze(&self, _document: &Html, _url: &str, page: &PageResult) -> Vec<Finding> {
        let Some(security) = &page.security_headers else {
            return Vec::new();
        };

        let severity = match security.score {
            0..=39 => Severity::Critical,
            40..=79 => Severity::Warning,
            _ => Severity::Info,
        };

        let mut findings = vec![Finding::new(
            self.name(),
            "security.score",
            severity,
            format!("Security header score {}/100", security.score),
        )
        .with_data(json!({ "score": security.score }))];

        findings.extend(security.recommendations.iter().map(|recommendation| {
            Finding::new(
                self.name(),
                "security.recommendation",
                Severity::Warning,
                recommendation.clone(),
            )
        }));
        findings
    }
}

/// Checks `<title>` presence and length
pub struct TitleAnalyzer {
    pub max_length: usize,
}

impl Default for TitleAnalyzer {
    fn default() -> Self {
        Self { max_length: 60 }
    }
}

impl Analyzer for TitleAnalyzer {
    fn name(&self) -> &str {
        "title"
    }

    fn analyze(&self, _document: &Html, _url: &str, page: &PageResult) -> Vec<Finding> {
        match &page.title {
            None => vec![Finding::new(
                self.name(),
                "title.missing",
                Severity::Warning,
                "Page has no <title>",
            )],
            Some(title) if title.chars().count() > self.max_length => vec![Finding::new(
                self.name(),
                "title.too_long",
                Severity::Info,
                format!(
                    "Title is {} characters, longer than {}",
                    title.chars().count(),
                    self.max_length
                ),
            )
            .with_data(json!({ "title": title }))],
            Some(_) => Vec::new(),
        }
    }
}

/// Flags `http://` subresources on pages served over https
pub struct MixedContentAnalyzer;

impl Analyzer for MixedContentAnalyzer {
    fn name(&self) -> &str {
        "mixed_content"
    }

    fn analyze(&self, document: &Html, _url: &str, page: &PageResult) -> Vec<Finding> {
        if !page.final_url.starts_with("https://") {
            return Vec::new();
        }
        let Ok(selector) = Selector::parse("script[src], img[src], iframe[src], link[rel='stylesheet'][href]") else {
            return Vec::new();
        };

        let insecure: Vec<&str> = document
            .select(&selector)
            .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("href")))
            .filter(|src| src.trim_start().to_ascii_lowercase().starts_with("http://"))
            .collect();

        if insecure.is_empty() {
            return Vec::new();
        }

        vec![Finding::new(
            self.name(),
            "mixed_content.subresources",
            Severity::Critical,
            format!("{} subresource(s) loaded over plain http", insecure.len()),
        )
        .with_data(json!({ "urls": insecure }))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::page;
    use crate::telemetry::score_security_headers;
    use reqwest::header::HeaderMap;

    #[test]
    fn test_security_findings_follow_recommendations() {
        let mut page = page("https://example.com/");
        page.security_headers = Some(score_security_headers(&HeaderMap::new()));

        let findings = SecurityHeaderAnalyzer.analyze(&Html::new_document(), &page.url, &page);
        assert_eq!(findings[0].code, "security.score");
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings.len(), 6);
    }

    #[test]
    fn test_title_findings() {
        let mut page = page("https://example.com/");
        let analyzer = TitleAnalyzer { max_length: 10 };
        let document = Html::new_document();

        assert_eq!(analyzer.analyze(&document, &page.url, &page)[0].code, "title.missing");

        page.title = Some("A title that is far too long".to_string());
        assert_eq!(analyzer.analyze(&document, &page.url, &page)[0].code, "title.too_long");

        page.title = Some("Short".to_string());
        assert!(analyzer.analyze(&document, &page.url, &page).is_empty());
    }

    #[test]
    fn test_mixed_content() {
        let document = Html::parse_document(
            r#"<html><head><script src="http://cdn.example.com/a.js"></script>
               <link rel="stylesheet" href="https://cdn.example.com/a.css"></head>
               <body><img src="http://img.example.com/x.png"></body></html>"#,
        );

        let https = page("https://example.com/");
        let findings = MixedContentAnalyzer.analyze(&document, &https.url, &https);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].data["urls"].as_array().unwrap().len(), 2);

        let http = page("http://example.com/");
        assert!(MixedContentAnalyzer.analyze(&document, &http.url, &http).is_empty());
    }
}
