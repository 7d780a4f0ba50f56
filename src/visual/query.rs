use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;

use crate::script::Scene;
use crate::text::Language;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "have", "your", "just", "about",
    "scene", "real", "short", "india", "hota", "hogi", "mein", "they", "them", "what", "when",
    "will", "were", "been", "into",
];

fn token_regex() -> Result<&'static Regex> {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_try_init(|| Regex::new(r"[a-z]{4,}").context("failed to compile token regex"))
}

/// Significant words of a scene: four or more letters, stop words removed.
pub fn text_tokens(text: &str) -> Result<Vec<String>> {
    let lower = text.to_lowercase();
    Ok(token_regex()?
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect())
}

/// Search queries for one scene. Keywords only count when they are in the
/// cooldown-filtered `allowed` set. Falls back to the language's generic query.
pub fn scene_queries(
    scene: &Scene,
    allowed: &[String],
    per_scene: usize,
    language: Language,
) -> Result<Vec<String>> {
    let allowed: HashSet<String> = allowed.iter().map(|k| k.trim().to_lowercase()).collect();
    let keywords: Vec<String> = scene
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && allowed.contains(k))
        .collect();
    let tokens = text_tokens(&scene.text)?;

    let mut queries: Vec<String> = Vec::new();
    let mut push = |q: String| {
        if !queries.contains(&q) {
            queries.push(q);
        }
    };
    for k in keywords.iter().take(3) {
        push(k.clone());
    }
    for t in tokens.iter().take(4) {
        push(t.clone());
    }
    if let (Some(k), Some(t)) = (keywords.first(), tokens.first()) {
        push(format!("{} {}", k, t));
    }

    queries.truncate(per_scene.max(1));
    if queries.is_empty() {
        queries.push(language.fallback_query().to_string());
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(text: &str, keywords: &[&str]) -> Scene {
        Scene {
            text: text.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            tone: "neutral".to_string(),
            duration_estimate: 6.0,
        }
    }

    #[test]
    fn keywords_must_be_allowed() {
        let s = scene("Your savings grow with compounding", &["Money", "budget"]);
        let allowed = vec!["budget".to_string()];
        let queries = scene_queries(&s, &allowed, 2, Language::English).unwrap();
        assert_eq!(queries, vec!["budget".to_string(), "savings".to_string()]);
    }

    #[test]
    fn falls_back_to_text_then_locale() {
        let s = scene("The metro commute", &["rent"]);
        let queries = scene_queries(&s, &[], 2, Language::English).unwrap();
        assert_eq!(queries, vec!["metro".to_string(), "commute".to_string()]);

        let hindi = scene("यह एक छोटा दृश्य है", &[]);
        let queries = scene_queries(&hindi, &[], 2, Language::Hindi).unwrap();
        assert_eq!(queries, vec![Language::Hindi.fallback_query().to_string()]);
    }

    #[test]
    fn stop_words_are_dropped() {
        let tokens = text_tokens("This is just about your FUTURE wealth").unwrap();
        assert_eq!(tokens, vec!["future".to_string(), "wealth".to_string()]);
    }
}
