//! Bracketed directives embedded in message content.
//!
//! Content is stored verbatim; this layer turns the first recognized token
//! into a tagged [`Directive`] and strips it from the displayed text.

const POST_FEEDBACK: &str = "[POST_FEEDBACK:";
const JOB_LINK: &str = "[JOB_LINK:";

/// Action attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Invite the reader to post feedback for a finished job.
    PostFeedback { job_id: String },
    /// Link to a job the sender applied to.
    ViewJob { job_id: String },
    None,
}

/// Message content split into its directive and the text to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContent {
    pub directive: Directive,
    pub text: String,
}

/// Parse `content`. `[POST_FEEDBACK:..]` wins over `[JOB_LINK:..]`; content
/// without a recognized token comes back unchanged.
pub fn parse(content: &str) -> ParsedContent {
    if let Some((job_id, text)) = extract(content, POST_FEEDBACK) {
        return ParsedContent {
            directive: Directive::PostFeedback { job_id },
            text,
        };
    }
    if let Some((job_id, text)) = extract(content, JOB_LINK) {
        return ParsedContent {
            directive: Directive::ViewJob { job_id },
            text,
        };
    }
    ParsedContent {
        directive: Directive::None,
        text: content.to_string(),
    }
}

/// Find the first `<prefix><id>]` with a non-empty id and return the id and
/// the content with that token removed and trimmed.
fn extract(content: &str, prefix: &str) -> Option<(String, String)> {
    let mut from = 0;
    while let Some(found) = content[from..].find(prefix) {
        let start = from + found;
        let id_start = start + prefix.len();
        // The id spans at least one character up to the next ']'.
        let first = content[id_start..].chars().next()?;
        let search_from = id_start + first.len_utf8();
        if let Some(close) = content[search_from..].find(']') {
            let end = search_from + close;
            let job_id = content[id_start..end].to_string();
            let text = format!("{}{}", &content[..start], &content[end + 1..]);
            return Some((job_id, text.trim().to_string()));
        }
        from = id_start;
    }
    None
}
