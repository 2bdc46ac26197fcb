use regex::Regex;
use snafu::{ResultExt, Snafu};

use super::tokenizer::Tokenizer;

/// Replacements applied by the tokenizer, in order.
const PATTERNS: [(&str, &str); 12] = [
    (r"'", " '  "),
    (r#"""#, ""),
    (r"\.", " . "),
    (r"<br />", " "),
    (r",", " , "),
    (r"\(", " ( "),
    (r"\)", " ) "),
    (r"!", " ! "),
    (r"\?", " ? "),
    (r";", " "),
    (r":", " "),
    (r"\s+", " "),
];

/// Basic English tokenizer errors.
#[derive(Debug, Snafu)]
pub enum BasicEnglishTokenizerError {
    #[snafu(display("Cannot compile pattern '{pattern}'"))]
    CompilePattern {
        pattern: &'static str,
        source: regex::Error,
    },
}

/// Basic English tokenizer.
///
/// Lower-cases the text, separates punctuation from words, removes double
/// quotes, semicolons and colons, and splits on whitespace.
#[derive(Clone, Debug)]
pub struct BasicEnglishTokenizer {
    patterns: Vec<(Regex, &'static str)>,
}

impl BasicEnglishTokenizer {
    /// Construct the tokenizer.
    pub fn new() -> Result<Self, BasicEnglishTokenizerError> {
        let patterns = PATTERNS
            .iter()
            .map(|&(pattern, replacement)| {
                Regex::new(pattern)
                    .context(CompilePatternSnafu { pattern })
                    .map(|regex| (regex, replacement))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }
}

impl Tokenizer for BasicEnglishTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut text = text.to_lowercase();
        for (pattern, replacement) in &self.patterns {
            text = pattern.replace_all(&text, *replacement).into_owned();
        }
        text.split_whitespace().map(ToOwned::to_owned).collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::BasicEnglishTokenizer;
    use crate::tokenizers::Tokenizer;

    #[rstest]
    #[case("Hello World!", &["hello", "world", "!"])]
    #[case("It's (mostly) fine.", &["it", "'", "s", "(", "mostly", ")", "fine", "."])]
    #[case("\"Quoted\"; colon: here", &["quoted", "colon", "here"])]
    #[case(" = Valkyria Chronicles III = \n", &["=", "valkyria", "chronicles", "iii", "="])]
    #[case("line<br />break, ok?", &["line", "break", ",", "ok", "?"])]
    #[case("   ", &[])]
    fn basic_english_tokenizes(#[case] text: &str, #[case] expected: &[&str]) {
        let tokenizer = BasicEnglishTokenizer::new().unwrap();
        assert_eq!(tokenizer.tokenize(text), expected);
    }
}
