//! Paragraph-first text chunking.
//!
//! Paragraphs are packed together up to the size limit. A paragraph that is
//! too long on its own is cut at sentence boundaries. A single sentence
//! longer than the limit is kept whole.

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？', '…', '；'];
const CLOSING_MARKS: &[char] = &['"', '\'', '”', '’', '」', '』', '）', ')', '》'];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split a paragraph into sentences, each keeping its terminator, any closing
/// quotes and trailing whitespace, so the pieces concatenate back to the input.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&c) {
            continue;
        }
        // Absorb runs like "?!" or "……" and closing quotes
        while let Some(&(_, next)) = chars.peek() {
            if SENTENCE_TERMINATORS.contains(&next) || CLOSING_MARKS.contains(&next) {
                chars.next();
            } else {
                break;
            }
        }
        while let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }
        let end = chars.peek().map(|&(i, _)| i).unwrap_or(paragraph.len());
        sentences.push(&paragraph[start..end]);
        start = end;
    }

    if start < paragraph.len() {
        sentences.push(&paragraph[start..]);
    }
    sentences
}

fn pack_sentences(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(paragraph) {
        if !current.is_empty() && char_len(&current) + char_len(sentence) > max_chars {
            pieces.push(current.trim().to_string());
            current = String::new();
        }
        current.push_str(sentence);
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}

/// Chunk `text` into pieces of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let paragraphs = text.lines().map(str::trim).filter(|p| !p.is_empty());

    for paragraph in paragraphs {
        let len = char_len(paragraph);

        if !current.is_empty() && char_len(&current) + 2 + len <= max_chars {
            current.push_str("\n\n");
            current.push_str(paragraph);
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if len <= max_chars {
            current.push_str(paragraph);
        } else {
            let mut pieces = pack_sentences(paragraph, max_chars);
            // The last piece may still absorb the next short paragraph
            if let Some(last) = pieces.pop() {
                chunks.extend(pieces);
                current = last;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_text("", 500).is_empty());
        assert!(chunk_text("  \n\n \n", 500).is_empty());
    }

    #[test]
    fn test_short_paragraphs_coalesce() {
        let chunks = chunk_text("First.\n\nSecond.\nThird.", 500);
        assert_eq!(chunks, vec!["First.\n\nSecond.\n\nThird."]);
    }

    #[test]
    fn test_paragraphs_split_when_over_limit() {
        let a = "a".repeat(30);
        let b = "b".repeat(30);
        let chunks = chunk_text(&format!("{}\n\n{}", a, b), 50);
        assert_eq!(chunks, vec![a, b]);
    }

    #[test]
    fn test_long_paragraph_split_at_sentences() {
        let paragraph = "The rain fell. The lamp flickered! Who knocked? Nobody answered.";
        let chunks = chunk_text(paragraph, 35);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 35, "chunk too long: {:?}", chunk);
        }
        assert_eq!(squash(&chunks.concat()), squash(paragraph));
    }

    #[test]
    fn test_cjk_sentences() {
        let paragraph = "夜色渐深。城门已经关闭！他还能去哪里？“没有人知道。”";
        let chunks = chunk_text(paragraph, 12);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 12, "chunk too long: {:?}", chunk);
        }
        assert_eq!(squash(&chunks.concat()), squash(paragraph));
        assert!(chunks.iter().any(|c| c.ends_with("”")));
    }

    #[test]
    fn test_oversized_sentence_kept_whole() {
        let long_sentence = format!("{}.", "x".repeat(80));
        let text = format!("Short one. {} Tail.", long_sentence);
        let chunks = chunk_text(&text, 20);

        assert!(chunks.contains(&long_sentence));
        for chunk in chunks.iter().filter(|c| **c != long_sentence) {
            assert!(chunk.chars().count() <= 20);
        }
    }

    #[test]
    fn test_reconstruction_property() {
        let text = "Chapter one opens.\n\nA long paragraph follows here. It has several sentences. \
                    Each is short. But together they exceed the limit by a wide margin.\n\n\
                    End.";
        for limit in [10, 25, 40, 80, 500] {
            let chunks = chunk_text(text, limit);
            assert_eq!(squash(&chunks.concat()), squash(text), "limit {}", limit);
        }
    }

    #[test]
    fn test_split_sentences_keeps_closing_quotes() {
        let parts = split_sentences("He said \"Go!\" Then left.");
        assert_eq!(parts, vec!["He said \"Go!\" ", "Then left."]);
    }
}
