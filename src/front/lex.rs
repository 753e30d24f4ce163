//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Byte offset of the first character of this token.
    pub pos: usize,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("fun")]
    Fun,
    #[display("struct")]
    Struct,
    #[display("int")]
    IntTy,
    #[display("bool")]
    BoolTy,
    #[display("void")]
    VoidTy,
    #[display("true")]
    True,
    #[display("false")]
    False,
    #[display("null")]
    Null,
    #[display("new")]
    New,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("return")]
    Return,
    #[display("print")]
    Print,
    #[display("println")]
    PrintLn,
    #[display("delete")]
    Delete,
    #[display("read")]
    Read,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(",")]
    Comma,
    #[display(";")]
    Semi,
    #[display(".")]
    Dot,
    #[display(":")]
    Colon,
    #[display("->")]
    Arrow,
    #[display("==")]
    EqEq,
    #[display("!=")]
    Neq,
    #[display("<=")]
    Leq,
    #[display(">=")]
    Geq,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("=")]
    Assign,
    #[display("!")]
    Bang,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
}

#[derive(Clone, Copy)]
pub struct LexError(pub usize, pub char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for LexError {}

/// Reserved words, tried after the generic identifier pattern matches.
fn keyword(text: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match text {
        "fun" => Fun,
        "struct" => Struct,
        "int" => IntTy,
        "bool" => BoolTy,
        "void" => VoidTy,
        "true" => True,
        "false" => False,
        "null" => Null,
        "new" => New,
        "if" => If,
        "else" => Else,
        "while" => While,
        "return" => Return,
        "print" => Print,
        "println" => PrintLn,
        "delete" => Delete,
        "read" => Read,
        _ => return None,
    })
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;

        // Multi-character operators must precede the single-character
        // operators they share a prefix with.
        let matchers = vec![
            (r"[A-Za-z_][A-Za-z0-9_]*", Id),
            (r"[0-9]+", Num),
            (r"->", Arrow),
            (r"==", EqEq),
            (r"!=", Neq),
            (r"<=", Leq),
            (r">=", Geq),
            (r"&&", AndAnd),
            (r"\|\|", OrOr),
            (r"<", Lt),
            (r">", Gt),
            (r"=", Assign),
            (r"!", Bang),
            (r"\+", Plus),
            (r"-", Minus),
            (r"\*", Star),
            (r"/", Slash),
            (r"\(", LParen),
            (r"\)", RParen),
            (r"\{", LBrace),
            (r"\}", RBrace),
            (r"\[", LBracket),
            (r"\]", RBracket),
            (r",", Comma),
            (r";", Semi),
            (r"\.", Dot),
            (r":", Colon),
        ]
        .into_iter()
        .map(|(pat, kind)| (Regex::new(&format!(r"\A(?:{pat})")).unwrap(), kind))
        .collect();

        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://.*))*").unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();

        if self.end_of_input() {
            return Ok(None);
        }

        let start = self.pos;
        let rest = &self.input[start..];

        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = m.as_str();
                self.pos += text.len();

                let kind = if *kind == TokenKind::Id {
                    keyword(text).unwrap_or(TokenKind::Id)
                } else {
                    *kind
                };

                return Ok(Some(Token { kind, text, pos: start }));
            }
        }

        let bad = rest.chars().next().expect("not at end of input");
        Err(LexError(start, bad))
    }
}

impl<'input> Iterator for Lexer<'input> {
    type Item = Result<Token<'input>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        match Lexer::next(self) {
            Ok(Some(tok)) => Some(Ok(tok)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).map(|t| t.unwrap().kind).collect()
    }

    #[test]
    fn keywords_take_priority_over_identifiers() {
        assert_eq!(kinds("if else while return"), vec![
            TokenKind::If, TokenKind::Else, TokenKind::While, TokenKind::Return
        ]);
    }

    #[test]
    fn println_is_one_token_not_print_plus_ln() {
        assert_eq!(kinds("println"), vec![TokenKind::PrintLn]);
    }

    #[test]
    fn multichar_operators_beat_prefixes() {
        assert_eq!(
            kinds("== != <= >= && || -> = < > ! + - * /"),
            vec![
                TokenKind::EqEq, TokenKind::Neq, TokenKind::Leq, TokenKind::Geq,
                TokenKind::AndAnd, TokenKind::OrOr, TokenKind::Arrow, TokenKind::Assign,
                TokenKind::Lt, TokenKind::Gt, TokenKind::Bang, TokenKind::Plus,
                TokenKind::Minus, TokenKind::Star, TokenKind::Slash,
            ]
        );
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        assert_eq!(kinds("  // a comment\n  42 // trailing\n"), vec![TokenKind::Num]);
    }

    #[test]
    fn unexpected_character_is_an_error() {
        let mut lexer = Lexer::new("x @ y");
        assert!(lexer.next().unwrap().is_some());
        assert!(matches!(lexer.next(), Err(LexError(2, '@'))));
    }

    #[test]
    fn identifiers_may_contain_underscores_and_digits() {
        assert_eq!(kinds("_foo bar123"), vec![TokenKind::Id, TokenKind::Id]);
    }
}
