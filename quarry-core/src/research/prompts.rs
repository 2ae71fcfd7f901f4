//! Prompt templates for each controller node.
//!
//! Every node has a primary prompt and a shorter fallback used when the
//! primary call fails.

/// Research plan for the Initialize node.
pub fn plan(query: &str, date: &str) -> String {
    format!(
        "You are an expert research planner. Today's date is {date}.\n\n\
         Create a research plan for the query: \"{query}\"\n\n\
         Structure your answer with these markdown headings:\n\
         ## Objectives\n\
         ## Key Areas to Investigate\n\
         ## Methodology\n\
         ## Expected Outcomes\n\n\
         Use bullet points under each heading. Be specific to the query."
    )
}

pub fn plan_simple(query: &str) -> String {
    format!(
        "Write a short research plan for \"{query}\" with the headings \
         Objectives, Key Areas to Investigate, Methodology and Expected Outcomes."
    )
}

/// Sub-query generation. `findings` is a tail of the notes so far.
pub fn queries(query: &str, findings: &str, breadth: u32, date: &str) -> String {
    format!(
        "You are generating web search queries for a research project. \
         Today's date is {date}.\n\n\
         Main research query: \"{query}\"\n\n\
         Current findings:\n{findings}\n\n\
         Write exactly {breadth} specific search queries that explore aspects \
         not yet covered. Put each query on its own line. Do not number them, \
         do not add explanations, and do not prefix them with labels."
    )
}

pub fn queries_simple(query: &str, breadth: u32) -> String {
    format!("List {breadth} web search queries about: {query}\nOne per line, nothing else.")
}

/// Reflection over findings between Search passes.
pub fn reflection(query: &str, findings: &str, date: &str) -> String {
    format!(
        "Today's date is {date}. Reflect on the research so far for \"{query}\".\n\n\
         Findings:\n{findings}\n\n\
         Answer with these markdown headings:\n\
         ## Key Insights\n\
         ## Knowledge Gaps\n\
         ## Next Steps\n\
         ## Overall Reflection\n\n\
         Use bullet points for the first three sections and one paragraph for the last."
    )
}

pub fn reflection_simple(query: &str, findings: &str) -> String {
    format!(
        "Briefly list key insights, knowledge gaps and next steps for research on \
         \"{query}\" given these notes:\n{findings}"
    )
}

/// Analysis of the content fetched for one sub-query.
pub fn analysis(query: &str, main_query: &str, content: &str, date: &str) -> String {
    format!(
        "Today's date is {date}. You are analyzing sources for the research \
         question \"{main_query}\".\n\n\
         Sub-query: \"{query}\"\n\n\
         Source content:\n{content}\n\n\
         Summarize the key facts, statistics and claims relevant to the research \
         question. Attribute each claim to its source URL. Note disagreements \
         between sources."
    )
}

pub fn analysis_simple(query: &str, content: &str) -> String {
    format!("Summarize what these sources say about \"{query}\":\n\n{content}")
}

/// Source selection when too many pages were fetched.
pub fn source_selection(query: &str, sources: &str, limit: usize) -> String {
    format!(
        "Select the {limit} most relevant and reliable sources for the research \
         query \"{query}\". Prefer primary, academic and official sources.\n\n\
         Sources:\n{sources}\n\n\
         Reply with the chosen URLs, one per line."
    )
}

pub fn source_selection_simple(query: &str, sources: &str) -> String {
    format!("Which of these URLs are most useful for \"{query}\"? List them.\n\n{sources}")
}

/// First report draft.
pub fn initial_report(
    query: &str,
    findings: &str,
    citations: &str,
    max_citation_id: u32,
    date: &str,
) -> String {
    format!(
        "Today's date is {date}. Write a comprehensive research report in markdown \
         answering: \"{query}\"\n\n\
         Research findings:\n{findings}\n\n\
         Available sources:\n{citations}\n\n\
         Start with a `# ` title, then an executive summary, then thematic sections. \
         Cite sources inline as [n] using only ids 1 to {max_citation_id}. \
         Do not write a references section."
    )
}

pub fn initial_report_simple(query: &str, findings: &str) -> String {
    format!("Write a markdown report on \"{query}\" based on these notes:\n\n{findings}")
}

/// Improve clarity and depth of a draft.
pub fn enhance_report(query: &str, draft: &str, max_citation_id: u32) -> String {
    format!(
        "Improve the following research report on \"{query}\". Add depth where \
         sections are thin, tighten the prose and keep every existing citation. \
         Only cite ids 1 to {max_citation_id}. Return the full report in markdown.\n\n\
         {draft}"
    )
}

pub fn enhance_report_simple(draft: &str) -> String {
    format!("Polish this report and return it in full:\n\n{draft}")
}

/// Expand the sections of an enhanced report.
pub fn expand_report(query: &str, draft: &str, findings: &str, max_citation_id: u32) -> String {
    format!(
        "Expand the research report on \"{query}\" using the additional findings \
         below. Add examples, data and analysis to each section. Keep the \
         structure and citations; only cite ids 1 to {max_citation_id}. Return \
         the full report in markdown.\n\n\
         Report:\n{draft}\n\n\
         Additional findings:\n{findings}"
    )
}

pub fn expand_report_simple(draft: &str) -> String {
    format!("Make this report more detailed and return it in full:\n\n{draft}")
}

/// One-shot answer for `quarry aisearch`. `sources` is a numbered list.
pub fn ai_search(query: &str, sources: &str, detailed: bool, date: &str) -> String {
    let depth = if detailed {
        "Provide a detailed and comprehensive analysis with in-depth explanations, \
         specific examples and relevant background."
    } else {
        "Provide a concise yet informative summary of the key points."
    };
    format!(
        "You are an expert analyst. Based on the following sources retrieved on \
         {date} for the query \"{query}\", {depth}\n\n\
         - If the query is a question, answer it directly.\n\
         - If it is a topic, give a well-rounded overview.\n\
         - Organize the answer with bullet points or numbered lists.\n\
         - Discuss conflicting views or uncertainties explicitly.\n\
         - Cite sources with their number in square brackets, like [1].\n\
         - Only use the citation numbers listed below.\n\n\
         Sources:\n\n{sources}"
    )
}

pub fn ai_search_simple(query: &str, sources: &str) -> String {
    format!("Answer \"{query}\" from these sources, citing them as [n]:\n\n{sources}")
}

/// Keep at most `max_chars` from the end of `text`, on a char boundary.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Keep at most `max_chars` from the start of `text`, on a char boundary.
pub fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_carry_inputs() {
        let p = queries("solar", "notes", 3, "2026-10-18");
        assert!(p.contains("\"solar\""));
        assert!(p.contains("exactly 3"));
        assert!(initial_report("q", "f", "c", 4, "d").contains("1 to 4"));
    }

    #[test]
    fn test_head_and_tail_respect_char_boundaries() {
        assert_eq!(tail("héllo", 3), "llo");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(head("héllo", 2), "hé");
        assert_eq!(head("ab", 5), "ab");
    }
}
