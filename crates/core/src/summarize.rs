//! Turns transcript text into a [`StructuredDocument`].
//!
//! Long text is cut into chunks that fit one backend request, each chunk is
//! summarized on its own, and the per-chunk results are merged in order.

use futures::future::try_join_all;
use serde::Deserialize;

use crate::{
    backend::{Completion, CompletionClient, Prompt},
    config::Config,
    error::{Result, StudydocError},
    types::{BodySection, ChunkSummary, StructuredDocument, TextChunk},
};

/// Characters reserved for the instructions wrapped around each chunk.
pub const PROMPT_HEADROOM_CHARS: usize = 1_500;
pub const MIN_CHUNK_CHARS: usize = 500;

static CHUNK_SYSTEM_PROMPT: &str = r#"You are an expert analyst of recorded course videos. You receive one part of a lecture transcript and produce study notes for that part only.

You MUST output ONLY valid JSON matching this exact structure (no markdown, no explanation):
{
  "summary": "2-4 sentence summary of this part",
  "key_points": ["key point 1", "key point 2", "key point 3"]
}

Rules:
- Summarize only the text you were given, do not invent content
- Key points are short, self-contained statements (3-7 items)
- Output ONLY the JSON, nothing else"#;

static REWORD_SYSTEM_PROMPT: &str = "You are an editor. Rewrite the given summary of a lecture so it reads as one clear, concise paragraph. Keep every fact, add nothing. Output only the rewritten summary.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizeOptions {
    /// Maximum characters per chunk.
    pub chunk_limit: usize,
    /// Ask for a rewording pass when the text fit in a single chunk.
    pub reword_single_chunk: bool,
}

impl SummarizeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_limit: config
                .backend
                .chunk_chars
                .saturating_sub(PROMPT_HEADROOM_CHARS)
                .max(MIN_CHUNK_CHARS),
            reword_single_chunk: config.processing.txt2md.reword_single_chunk,
        }
    }
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(['.', '?', '!'])
}

fn split_paragraphs(body: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    paragraphs
}

/// Byte offset to cut `text` at so the head holds at most `limit` chars.
///
/// Prefers the last sentence end, then the last whitespace, and only cuts
/// inside a word when the window contains neither.
fn find_cut(text: &str, limit: usize) -> usize {
    let Some((window_end, _)) = text.char_indices().nth(limit) else {
        return text.len();
    };

    let mut sentence_cut = None;
    let mut space_cut = None;
    for (i, c) in text[..window_end].char_indices() {
        if c.is_whitespace() && i > 0 {
            space_cut = Some(i);
        }
        if matches!(c, '.' | '?' | '!') {
            let next = i + c.len_utf8();
            let followed_by_space = text[next..]
                .chars()
                .next()
                .is_none_or(char::is_whitespace);
            if followed_by_space {
                sentence_cut = Some(next);
            }
        }
    }
    if text[window_end..].starts_with(char::is_whitespace) {
        space_cut = Some(window_end);
    }

    sentence_cut.or(space_cut).unwrap_or(window_end)
}

fn hard_split(paragraph: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = paragraph.trim();
    while rest.chars().count() > limit {
        let cut = find_cut(rest, limit);
        let (head, tail) = rest.split_at(cut);
        pieces.push(head.trim_end().to_string());
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Split `body` into ordered chunks of at most `limit` characters.
///
/// Chunks follow paragraph (blank line) boundaries where possible; a paragraph
/// longer than `limit` is cut at sentence ends, then at whitespace.
pub fn chunk_text(body: &str, limit: usize) -> Vec<TextChunk> {
    let limit = limit.max(1);
    let body = body.trim();
    if body.is_empty() {
        return Vec::new();
    }

    let mut contents: Vec<String> = Vec::new();
    if body.chars().count() <= limit {
        contents.push(body.to_string());
    } else {
        let mut current = String::new();
        let mut current_len = 0usize;
        for paragraph in split_paragraphs(body) {
            let para_len = paragraph.chars().count();
            if para_len > limit {
                if !current.is_empty() {
                    contents.push(std::mem::take(&mut current));
                }
                let mut pieces = hard_split(&paragraph, limit);
                let last = pieces.pop();
                contents.extend(pieces);
                if let Some(last) = last {
                    current_len = last.chars().count();
                    current = last;
                }
                continue;
            }

            let joined_len = if current.is_empty() {
                para_len
            } else {
                current_len + 2 + para_len
            };
            if joined_len <= limit {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(&paragraph);
                current_len = joined_len;
            } else {
                contents.push(std::mem::replace(&mut current, paragraph));
                current_len = para_len;
            }
        }
        if !current.is_empty() {
            contents.push(current);
        }
    }

    contents
        .into_iter()
        .enumerate()
        .map(|(sequence_number, content)| TextChunk {
            sequence_number,
            approx_size: content.chars().count(),
            content,
        })
        .collect()
}

#[derive(Deserialize)]
struct ChunkResponse {
    summary: String,
    #[serde(default, alias = "keyPoints", alias = "key_takeaways")]
    key_points: Vec<String>,
}

/// Parse a `{"summary": ..., "key_points": [...]}` answer, tolerating code
/// fences and chatter around the JSON object.
pub fn parse_chunk_response(raw: &str) -> Option<(String, Vec<String>)> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: ChunkResponse = serde_json::from_str(&raw[start..=end]).ok()?;
    let summary = parsed.summary.trim().to_string();
    if summary.is_empty() {
        return None;
    }
    let key_points = parsed
        .key_points
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    Some((summary, key_points))
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_key_point(point: &str) -> String {
    point
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `text` begins with the whole words of `head`. Both are normalized.
fn starts_with_words(text: &str, head: &str) -> bool {
    text.strip_prefix(head)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

/// Drop near-duplicate key points, keeping the first occurrence and its casing.
///
/// Two points are duplicates when their normalized forms are equal or the
/// words of one are a leading run of the other's words.
pub fn dedup_key_points<'a>(points: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut kept: Vec<(String, String)> = Vec::new();
    for point in points {
        let normalized = normalize_key_point(point);
        if normalized.is_empty() {
            continue;
        }
        let duplicate = kept
            .iter()
            .any(|(seen, _)| starts_with_words(seen, &normalized) || starts_with_words(&normalized, seen));
        if !duplicate {
            kept.push((normalized, point.trim().to_string()));
        }
    }
    kept.into_iter().map(|(_, original)| original).collect()
}

/// Join chunk summaries in order, making sure each ends a sentence.
pub fn merge_summaries(summaries: &[ChunkSummary]) -> String {
    if let [only] = summaries {
        return only.summary.trim().to_string();
    }
    summaries
        .iter()
        .map(|s| s.summary.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if ends_sentence(s) {
                s.to_string()
            } else {
                format!("{s}.")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `intro_to_caching-part1` → `intro to caching part1`, but keeps the id when
/// nothing else would be left.
pub fn title_from_unit_id(unit_id: &str) -> String {
    let title = unit_id
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        unit_id.to_string()
    } else {
        title
    }
}

pub struct Summarizer {
    client: CompletionClient,
    options: SummarizeOptions,
}

impl Summarizer {
    pub fn new(client: CompletionClient, config: &Config) -> Self {
        Self::with_options(client, SummarizeOptions::from_config(config))
    }

    pub fn with_options(client: CompletionClient, options: SummarizeOptions) -> Self {
        Self { client, options }
    }

    /// Summarize `body` for the unit `unit_id`. Any chunk that cannot be
    /// summarized fails the whole call; nothing partial is returned.
    pub async fn summarize(&self, unit_id: &str, body: &str) -> Result<StructuredDocument> {
        let title = title_from_unit_id(unit_id);
        let chunks = chunk_text(body, self.options.chunk_limit);
        if chunks.is_empty() {
            return Err(StudydocError::EmptyTranscript);
        }
        tracing::info!(
            unit = unit_id,
            chunks = chunks.len(),
            limit = self.options.chunk_limit,
            "Summarizing"
        );

        let total = chunks.len();
        let summaries = try_join_all(
            chunks
                .iter()
                .map(|chunk| self.summarize_chunk(&title, chunk, total)),
        )
        .await?;

        let mut summary = merge_summaries(&summaries);
        if total == 1 && self.options.reword_single_chunk {
            summary = self.reword(unit_id, summary).await;
        }

        let key_points = dedup_key_points(
            summaries
                .iter()
                .flat_map(|s| s.key_points.iter().map(String::as_str)),
        );

        let body_sections = chunks
            .into_iter()
            .map(|chunk| BodySection {
                heading: if total == 1 {
                    String::new()
                } else {
                    format!("Part {}", chunk.sequence_number + 1)
                },
                text: chunk.content,
            })
            .collect();

        Ok(StructuredDocument {
            title,
            summary,
            key_points,
            body_sections,
        })
    }

    async fn summarize_chunk(
        &self,
        title: &str,
        chunk: &TextChunk,
        total: usize,
    ) -> Result<ChunkSummary> {
        let prompt = Prompt {
            system: CHUNK_SYSTEM_PROMPT.to_string(),
            user: format!(
                "Transcript of \"{}\", part {} of {}:\n\n{}",
                title,
                chunk.sequence_number + 1,
                total,
                chunk.content
            ),
        };
        let operation = format!("summarize chunk {}", chunk.sequence_number);

        let completion = self
            .client
            .complete_parsed(&operation, &prompt, parse_chunk_response)
            .await
            .map_err(|e| StudydocError::Summarization {
                chunk: chunk.sequence_number,
                reason: e.to_string(),
            })?;

        let (summary, key_points) = match completion {
            Completion::Parsed(parsed) => parsed,
            Completion::Unparsed(raw) => {
                tracing::warn!(
                    chunk = chunk.sequence_number,
                    "Backend answer was not structured, using it as the summary"
                );
                (raw.trim().to_string(), Vec::new())
            }
        };
        tracing::debug!(
            chunk = chunk.sequence_number,
            key_points = key_points.len(),
            "Chunk summarized"
        );

        Ok(ChunkSummary {
            sequence_number: chunk.sequence_number,
            summary,
            key_points,
        })
    }

    /// Rewording is cosmetic: on failure the original summary is kept.
    async fn reword(&self, unit_id: &str, summary: String) -> String {
        let prompt = Prompt {
            system: REWORD_SYSTEM_PROMPT.to_string(),
            user: summary.clone(),
        };
        match self.client.complete("reword summary", &prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => summary,
            Err(err) => {
                tracing::warn!(unit = unit_id, error = %err, "Rewording failed, keeping summary");
                summary
            }
        }
    }
}
