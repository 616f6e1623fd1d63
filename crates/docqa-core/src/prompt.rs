//! Grounded-answer prompt template.

/// Marker the model must put before information that is not in the documents.
pub const ADDITIONAL_INFO_MARKER: &str = "(Additional info, NOT from the documents)";

/// Statement the model must make when the documents lack the answer.
pub const NOT_FOUND_NOTICE: &str = "This information was NOT found in the provided documents.";

/// Instruction template with `{history}`, `{context}` and `{question}` slots.
pub const PROMPT_TEMPLATE: &str = r#"
You are an AI assistant answering questions using BOTH:
1. Retrieved document context (primary source)
2. Your own general knowledge (secondary source)

Your job is to:
- First check whether the answer can be found in the provided context.
- If the context contains the answer:
    * Answer based on the context.
    * You MAY add extra correct information from your own knowledge,
      but clearly mark it as: "(Additional info, NOT from the documents)" before adding it.
- If the context does NOT contain the answer:
    * Answer using your own knowledge.
    * Clearly state, "This information was NOT found in the provided documents.", before your answer.

### STRICT RULES
- Do NOT hallucinate. If you do not know, say so.
- Your answer must be helpful. It should not be concise but also not overly verbose.
- NEVER invent document content.
- NEVER claim something is in the documents unless it truly appears there.
- Do NOT repeat the question.
- Do NOT repeat large passages from context.

### CONVERSATION HISTORY
{history}

### CONTEXT (retrieved from documents)
{context}

### QUESTION
{question}

### ANSWER
"#;

/// Fill the template.
///
/// Slots are substituted in one pass, so braces inside the history, context
/// or question are left as they are.
pub fn render_prompt(history: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(
        PROMPT_TEMPLATE.len() + history.len() + context.len() + question.len(),
    );
    let mut rest = PROMPT_TEMPLATE;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let (value, consumed) = if after.starts_with("{history}") {
            (history, "{history}".len())
        } else if after.starts_with("{context}") {
            (context, "{context}".len())
        } else if after.starts_with("{question}") {
            (question, "{question}".len())
        } else {
            ("{", 1)
        };
        out.push_str(value);
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_filled() {
        let prompt = render_prompt(
            "User: hi\nAssistant: hello\n",
            "Paris is the capital of France.",
            "What is the capital of France?",
        );
        assert!(prompt.contains("### CONVERSATION HISTORY\nUser: hi\nAssistant: hello\n"));
        assert!(prompt.contains("### CONTEXT (retrieved from documents)\nParis is the capital"));
        assert!(prompt.contains("### QUESTION\nWhat is the capital of France?"));
        assert!(!prompt.contains("{history}"));
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn test_instructions_present() {
        let prompt = render_prompt("", "ctx", "q");
        assert!(prompt.contains(ADDITIONAL_INFO_MARKER));
        assert!(prompt.contains(NOT_FOUND_NOTICE));
        assert!(prompt.contains("NEVER invent document content."));
    }

    #[test]
    fn test_user_text_not_reinterpreted() {
        let prompt = render_prompt("", "a {question} literal", "{context}");
        assert!(prompt.contains("a {question} literal"));
        assert!(prompt.contains("### QUESTION\n{context}"));
    }
}
