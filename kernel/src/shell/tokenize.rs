// =============================================================================
// Skylark — Shell Tokenizer
// =============================================================================
//
// Splits a command line into words and operators with support for
// single and double quotes and backslash escapes, then shapes the
// tokens into a pipeline: up to eight stages, an optional output
// redirection (truncate or append), and a trailing `&` to background.
// =============================================================================

use alloc::string::String;
use alloc::vec::Vec;

/// Hard cap on pipeline stages.
pub const MAX_STAGES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A quote never closed.
    UnterminatedQuote,
    /// More than [`MAX_STAGES`] stages.
    TooManyStages,
    /// `>`/`>>` without a target, `|` without a command, `&` not last.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Pipe,
    RedirectOut,
    RedirectAppend,
    Background,
}

/// Split a line into tokens, honoring quotes and escapes.
pub fn tokenize(line: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut has_word = false;
    let mut chars = line.chars().peekable();

    let flush = |word: &mut String, has_word: &mut bool, tokens: &mut Vec<Token>| {
        if *has_word {
            tokens.push(Token::Word(core::mem::take(word)));
            *has_word = false;
        }
    };

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => flush(&mut word, &mut has_word, &mut tokens),
            '\'' => {
                has_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => return Err(ParseError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                has_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => word.push(escaped),
                            None => return Err(ParseError::UnterminatedQuote),
                        },
                        Some(ch) => word.push(ch),
                        None => return Err(ParseError::UnterminatedQuote),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => {
                    has_word = true;
                    word.push(escaped);
                }
                None => return Err(ParseError::Malformed),
            },
            '|' => {
                flush(&mut word, &mut has_word, &mut tokens);
                tokens.push(Token::Pipe);
            }
            '>' => {
                flush(&mut word, &mut has_word, &mut tokens);
                if chars.peek() == Some(&'>') {
                    chars.next();
                    tokens.push(Token::RedirectAppend);
                } else {
                    tokens.push(Token::RedirectOut);
                }
            }
            '&' => {
                flush(&mut word, &mut has_word, &mut tokens);
                tokens.push(Token::Background);
            }
            other => {
                has_word = true;
                word.push(other);
            }
        }
    }
    flush(&mut word, &mut has_word, &mut tokens);
    Ok(tokens)
}

/// A parsed pipeline job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// argv vectors, left to right.
    pub stages: Vec<Vec<String>>,
    /// Output target and append flag.
    pub redirect: Option<(String, bool)>,
    pub background: bool,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Shape a token stream into a pipeline.
pub fn parse(line: &str) -> Result<Pipeline, ParseError> {
    let tokens = tokenize(line)?;
    let mut stages: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut redirect: Option<(String, bool)> = None;
    let mut background = false;
    let mut it = tokens.into_iter().peekable();

    while let Some(token) = it.next() {
        // Nothing may follow `&`.
        if background {
            return Err(ParseError::Malformed);
        }
        match token {
            Token::Word(w) => current.push(w),
            Token::Pipe => {
                if current.is_empty() {
                    return Err(ParseError::Malformed);
                }
                stages.push(core::mem::take(&mut current));
                if stages.len() >= MAX_STAGES {
                    return Err(ParseError::TooManyStages);
                }
            }
            Token::RedirectOut | Token::RedirectAppend => {
                let append = token == Token::RedirectAppend;
                match it.next() {
                    Some(Token::Word(target)) => redirect = Some((target, append)),
                    _ => return Err(ParseError::Malformed),
                }
            }
            Token::Background => background = true,
        }
    }

    if !current.is_empty() {
        stages.push(current);
    } else if !stages.is_empty() {
        // Line ended with a pipe.
        return Err(ParseError::Malformed);
    }
    if stages.len() > MAX_STAGES {
        return Err(ParseError::TooManyStages);
    }

    Ok(Pipeline {
        stages,
        redirect,
        background,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(p: &Pipeline, stage: usize) -> Vec<&str> {
        p.stages[stage].iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn splits_plain_words() {
        let p = parse("echo hello world").unwrap();
        assert_eq!(p.stages.len(), 1);
        assert_eq!(words(&p, 0), ["echo", "hello", "world"]);
        assert!(!p.background);
        assert_eq!(p.redirect, None);
    }

    #[test]
    fn quotes_keep_spaces_and_escapes() {
        let p = parse("echo 'a b' \"c d\" e\\ f").unwrap();
        assert_eq!(words(&p, 0), ["echo", "a b", "c d", "e f"]);

        let p = parse(r#"echo "quote \" inside""#).unwrap();
        assert_eq!(words(&p, 0), ["echo", "quote \" inside"]);
    }

    #[test]
    fn single_quotes_are_literal() {
        let p = parse(r"echo 'no \ escape'").unwrap();
        assert_eq!(words(&p, 0), ["echo", r"no \ escape"]);
    }

    #[test]
    fn pipes_split_stages() {
        let p = parse("cat /tmp/log | grep err | grep fatal").unwrap();
        assert_eq!(p.stages.len(), 3);
        assert_eq!(words(&p, 1), ["grep", "err"]);
    }

    #[test]
    fn redirections_and_background() {
        let p = parse("echo A > /tmp/a").unwrap();
        assert_eq!(p.redirect, Some((String::from("/tmp/a"), false)));

        let p = parse("echo B >> log.txt").unwrap();
        assert_eq!(p.redirect, Some((String::from("log.txt"), true)));

        let p = parse("sleepy 100 &").unwrap();
        assert!(p.background);
        assert_eq!(words(&p, 0), ["sleepy", "100"]);
    }

    #[test]
    fn quoted_operators_are_words() {
        let p = parse("echo 'a|b' \">\"").unwrap();
        assert_eq!(words(&p, 0), ["echo", "a|b", ">"]);
    }

    #[test]
    fn errors() {
        assert_eq!(parse("echo 'open"), Err(ParseError::UnterminatedQuote));
        assert_eq!(parse("| grep x"), Err(ParseError::Malformed));
        assert_eq!(parse("cat a |"), Err(ParseError::Malformed));
        assert_eq!(parse("echo >"), Err(ParseError::Malformed));
        assert_eq!(parse("a & b"), Err(ParseError::Malformed));
        let long = "a | a | a | a | a | a | a | a | a";
        assert_eq!(parse(long), Err(ParseError::TooManyStages));
    }

    #[test]
    fn empty_line_parses_to_nothing() {
        let p = parse("   ").unwrap();
        assert!(p.is_empty());
    }
}
