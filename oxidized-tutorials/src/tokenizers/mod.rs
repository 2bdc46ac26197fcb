mod basic_english;
pub use basic_english::{BasicEnglishTokenizer, BasicEnglishTokenizerError};

mod tokenizer;
pub use tokenizer::Tokenizer;

mod vocab;
pub use vocab::{Vocab, VocabBuilder, VocabError};
