//! Tokenizer for mixed Latin and CJK template text
//!
//! Latin words and digit runs become one token each, the same as tantivy's
//! default tokenizer. A run of CJK characters becomes overlapping bigrams
//! at consecutive positions, so any substring of two or more characters
//! matches as a phrase. A lone CJK character is kept as a unigram.

use tantivy::tokenizer::{
    LowerCaser, RemoveLongFilter, TextAnalyzer, Token, TokenStream, Tokenizer,
};
use tantivy::Index;

/// Name the analyzer is registered under in every index handle
pub(crate) const CJK_TOKENIZER: &str = "codestyle_cjk";

/// Register the analyzer with an index; required after every create/open
pub(crate) fn register(index: &Index) {
    index.tokenizers().register(CJK_TOKENIZER, analyzer());
}

pub(crate) fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(CjkBigramTokenizer)
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .build()
}

#[derive(Clone, Copy, Default)]
pub(crate) struct CjkBigramTokenizer;

pub(crate) struct CjkTokenStream {
    tokens: std::vec::IntoIter<Token>,
    current: Token,
}

impl Tokenizer for CjkBigramTokenizer {
    type TokenStream<'a> = CjkTokenStream;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        CjkTokenStream {
            tokens: tokenize(text).into_iter(),
            current: Token::default(),
        }
    }
}

impl TokenStream for CjkTokenStream {
    fn advance(&mut self) -> bool {
        match self.tokens.next() {
            Some(token) => {
                self.current = token;
                true
            }
            None => false,
        }
    }

    fn token(&self) -> &Token {
        &self.current
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Word,
    Cjk,
    Separator,
}

fn classify(c: char) -> CharClass {
    if is_cjk(c) {
        CharClass::Cjk
    } else if c.is_alphanumeric() {
        CharClass::Word
    } else {
        CharClass::Separator
    }
}

fn is_cjk(c: char) -> bool {
    matches!(
        c,
        '\u{3040}'..='\u{30FF}'     // Hiragana, Katakana
            | '\u{3400}'..='\u{4DBF}'   // CJK Extension A
            | '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
            | '\u{AC00}'..='\u{D7AF}'   // Hangul syllables
            | '\u{F900}'..='\u{FAFF}'   // CJK Compatibility Ideographs
            | '\u{20000}'..='\u{2FA1F}' // Extensions B and later
    )
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut run: Vec<(usize, char)> = Vec::new();
    let mut run_class = CharClass::Separator;

    for (offset, c) in text.char_indices() {
        let class = classify(c);
        if class != run_class {
            flush(&run, run_class, &mut tokens);
            run.clear();
            run_class = class;
        }
        if class != CharClass::Separator {
            run.push((offset, c));
        }
    }
    flush(&run, run_class, &mut tokens);

    tokens
}

fn flush(run: &[(usize, char)], class: CharClass, tokens: &mut Vec<Token>) {
    match class {
        CharClass::Separator => {}
        CharClass::Word => push(run, tokens),
        CharClass::Cjk if run.len() == 1 => push(run, tokens),
        CharClass::Cjk => {
            for pair in run.windows(2) {
                push(pair, tokens);
            }
        }
    }
}

fn push(chars: &[(usize, char)], tokens: &mut Vec<Token>) {
    let (Some(&(start, _)), Some(&(last, last_char))) = (chars.first(), chars.last()) else {
        return;
    };
    tokens.push(Token {
        offset_from: start,
        offset_to: last + last_char.len_utf8(),
        position: tokens.len(),
        text: chars.iter().map(|&(_, c)| c).collect(),
        position_length: 1,
    });
}
