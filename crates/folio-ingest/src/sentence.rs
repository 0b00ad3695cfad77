//! Rule-based sentence segmentation for Chinese and Latin-script text.
//!
//! A sentence ends at `。！？!?；;`, or at `.` followed by whitespace or the
//! end of the text. Closing quotes and brackets that follow a terminator stay
//! with the sentence they close.

/// Characters that always end a sentence.
const TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '；', ';'];

/// Closing punctuation absorbed into the preceding sentence.
const CLOSERS: &[char] = &['”', '’', '"', '\'', '）', ')', '】', '」', '』', '》'];

/// Splits page text into sentences.
#[derive(Debug, Clone, Default)]
pub struct SentenceSplitter;

impl SentenceSplitter {
    /// Create a new splitter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Split `text` into trimmed, non-empty sentences.
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = unwrap_lines(text);
        let chars: Vec<char> = text.chars().collect();

        let mut sentences = Vec::new();
        let mut current = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            current.push(c);

            let ends = TERMINATORS.contains(&c)
                || (c == '.' && chars.get(i + 1).is_none_or(|n| n.is_whitespace()));

            if ends {
                while let Some(&next) = chars.get(i + 1) {
                    if CLOSERS.contains(&next) || TERMINATORS.contains(&next) {
                        current.push(next);
                        i += 1;
                    } else {
                        break;
                    }
                }
                push_trimmed(&mut sentences, &mut current);
            }
            i += 1;
        }
        push_trimmed(&mut sentences, &mut current);

        sentences
    }
}

fn push_trimmed(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn is_wide(c: char) -> bool {
    !c.is_ascii() && !c.is_whitespace()
}

/// Join hard-wrapped lines: a line break between two wide (CJK) characters
/// disappears, any other line break becomes a single space.
fn unwrap_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_break = false;

    for c in text.chars() {
        if c == '\n' || c == '\r' {
            pending_break = true;
            continue;
        }
        if pending_break {
            let joins_cjk = out.chars().last().is_some_and(is_wide) && is_wide(c);
            if !joins_cjk && !out.ends_with(' ') && !c.is_whitespace() {
                out.push(' ');
            }
            pending_break = false;
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str) -> Vec<String> {
        SentenceSplitter::new().split(text)
    }

    #[test]
    fn test_split_chinese() {
        assert_eq!(
            split("起重机必须定期检查。钢丝绳磨损怎么办？立即更换！"),
            ["起重机必须定期检查。", "钢丝绳磨损怎么办？", "立即更换！"]
        );
    }

    #[test]
    fn test_split_semicolons() {
        assert_eq!(split("先断电；再检修;最后试车"), ["先断电；", "再检修;", "最后试车"]);
    }

    #[test]
    fn test_split_english() {
        assert_eq!(
            split("Check the brake. Replace worn pads! Is the rope frayed?"),
            ["Check the brake.", "Replace worn pads!", "Is the rope frayed?"]
        );
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        assert_eq!(
            split("Load limit is 2.5 tons. Do not exceed it."),
            ["Load limit is 2.5 tons.", "Do not exceed it."]
        );
    }

    #[test]
    fn test_closing_quote_stays_with_sentence() {
        assert_eq!(
            split("他说：“先停机。”然后离开。"),
            ["他说：“先停机。”", "然后离开。"]
        );
    }

    #[test]
    fn test_repeated_terminators() {
        assert_eq!(split("真的吗？！不可能。"), ["真的吗？！", "不可能。"]);
    }

    #[test]
    fn test_line_breaks() {
        // CJK lines join directly, Latin lines join with a space
        assert_eq!(split("起重机必须\n定期检查。"), ["起重机必须定期检查。"]);
        assert_eq!(
            split("Inspect the\nhook daily."),
            ["Inspect the hook daily."]
        );
    }

    #[test]
    fn test_trailing_fragment_kept() {
        assert_eq!(split("第一句。没有句号的结尾"), ["第一句。", "没有句号的结尾"]);
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert!(split("").is_empty());
        assert!(split("  \n \n ").is_empty());
        assert!(split("。。").len() == 1);
    }
}
