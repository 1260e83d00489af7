//! Prompt assembly and answer extraction.

use crate::documents::SearchResult;

/// Chunk texts in rank order, separated by a blank line.
pub fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fill `{query}` and `{context}` in one pass over the template, so
/// placeholders inside the substituted text are left as they are.
pub fn render_prompt(template: &str, query: &str, context: &str) -> String {
    let mut out = String::with_capacity(template.len() + query.len() + context.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{query}") {
            out.push_str(query);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Text after the last `marker` in `generated`, trimmed.
///
/// Completion endpoints usually return only the continuation, but local
/// models often echo the prompt, which itself ends with the marker. Taking
/// the last occurrence covers both. Without any marker the whole output is
/// returned, trimmed.
pub fn extract_answer(generated: &str, marker: &str) -> String {
    match generated.rfind(marker) {
        Some(pos) => generated[pos + marker.len()..].trim().to_string(),
        None => generated.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ANSWER_MARKER, DEFAULT_PROMPT_TEMPLATE};

    fn result(rank: usize, text: &str) -> SearchResult {
        SearchResult {
            rank,
            distance: rank as f32,
            chunk_id: format!("doc_chunk{}.txt", rank),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_context_joins_in_rank_order() {
        let context = build_context(&[result(1, "first"), result(2, "second")]);
        assert_eq!(context, "first\n\nsecond");
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_default_prompt_contains_query_and_context() {
        let prompt = render_prompt(DEFAULT_PROMPT_TEMPLATE, "O que é NR-33?", "Norma sobre espaços confinados.");

        assert!(prompt.contains("Pergunta:\nO que é NR-33?"));
        assert!(prompt.contains("Contexto:\nNorma sobre espaços confinados."));
        assert!(prompt.trim_end().ends_with(DEFAULT_ANSWER_MARKER));
    }

    #[test]
    fn test_placeholders_in_inputs_are_not_expanded() {
        let prompt = render_prompt("Q: {query} C: {context} {other}", "{context}", "{query}");
        assert_eq!(prompt, "Q: {context} C: {query} {other}");
    }

    #[test]
    fn test_extract_after_marker() {
        let generated = "...blah Resposta:\n  The answer is 42  ";
        assert_eq!(extract_answer(generated, "Resposta:"), "The answer is 42");
    }

    #[test]
    fn test_extract_uses_last_marker() {
        let generated = "Pergunta: x\nResposta:\nResposta: final";
        assert_eq!(extract_answer(generated, "Resposta:"), "final");
    }

    #[test]
    fn test_extract_without_marker_returns_whole_text() {
        assert_eq!(extract_answer("  just text \n", "Resposta:"), "just text");
    }
}
