/// Trait implemented by all tokenizers.
pub trait Tokenizer {
    /// Split a text into tokens.
    ///
    /// * text - The text to tokenize.
    ///
    /// Returns: The tokens of the text.
    fn tokenize(&self, text: &str) -> Vec<String>;
}
