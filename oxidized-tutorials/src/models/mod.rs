pub mod char_rnn;

pub mod transformer_lm;
