//! Lexer implementation using logos

mod token;

pub use token::Token;

use crate::ast::Span;
use crate::error::{Result, VerifyError};
use logos::Logos;

/// Tokenize source code, turning significant newlines into `;`.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>> {
    let mut tokens: Vec<(Token, Span)> = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span().start, lexer.span().end);
        match result {
            Ok(Token::Newline | Token::BlockComment(true)) => insert_semicolon(&mut tokens, span),
            Ok(Token::BlockComment(false)) => {}
            Ok(token) => tokens.push((token, span)),
            Err(_) => {
                return Err(VerifyError::lexer(
                    format!("unexpected character: {:?}", lexer.slice()),
                    span,
                ));
            }
        }
    }
    insert_semicolon(&mut tokens, Span::new(source.len(), source.len()));

    Ok(tokens)
}

fn insert_semicolon(tokens: &mut Vec<(Token, Span)>, at: Span) {
    if tokens.last().is_some_and(|(last, _)| last.ends_statement()) {
        tokens.push((Token::Semi, at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_declaration_keywords() {
        assert_eq!(
            kinds("package import type struct func var {"),
            vec![
                Token::Package,
                Token::Import,
                Token::Type,
                Token::Struct,
                Token::Func,
                Token::Var,
                Token::LBrace
            ]
        );
    }

    #[test]
    fn test_tokenize_spec_keywords() {
        assert_eq!(
            kinds("ghost pure requires ensures preserves invariant assert assume old acc ("),
            vec![
                Token::Ghost,
                Token::Pure,
                Token::Requires,
                Token::Ensures,
                Token::Preserves,
                Token::Invariant,
                Token::Assert,
                Token::Assume,
                Token::Old,
                Token::Acc,
                Token::LParen
            ]
        );
    }

    #[test]
    fn test_tokenize_collection_operators() {
        assert_eq!(
            kinds("set mset union intersection setminus subset in # ("),
            vec![
                Token::Set,
                Token::Mset,
                Token::Union,
                Token::Intersection,
                Token::Setminus,
                Token::Subset,
                Token::In,
                Token::Hash,
                Token::LParen
            ]
        );
    }

    #[test]
    fn test_tokenize_implies_before_eqeq() {
        assert_eq!(
            kinds("a ==> b == c = d"),
            vec![
                Token::Ident("a".into()),
                Token::Implies,
                Token::Ident("b".into()),
                Token::EqEq,
                Token::Ident("c".into()),
                Token::Eq,
                Token::Ident("d".into()),
                Token::Semi
            ]
        );
    }

    #[test]
    fn test_tokenize_keyword_prefix_is_ident() {
        assert_eq!(
            kinds("settle inx"),
            vec![Token::Ident("settle".into()), Token::Ident("inx".into()), Token::Semi]
        );
    }

    #[test]
    fn test_semicolon_inserted_after_closing_bar() {
        assert_eq!(
            kinds("n = |m|\n}"),
            vec![
                Token::Ident("n".into()),
                Token::Eq,
                Token::Pipe,
                Token::Ident("m".into()),
                Token::Pipe,
                Token::Semi,
                Token::RBrace,
                Token::Semi
            ]
        );
    }

    #[test]
    fn test_no_semicolon_after_operator() {
        assert_eq!(
            kinds("a &&\nb"),
            vec![
                Token::Ident("a".into()),
                Token::AmpAmp,
                Token::Ident("b".into()),
                Token::Semi
            ]
        );
    }

    #[test]
    fn test_comments_skipped_but_newline_kept() {
        assert_eq!(
            kinds("x // trailing\n/* block */ y"),
            vec![Token::Ident("x".into()), Token::Semi, Token::Ident("y".into()), Token::Semi]
        );
    }

    #[test]
    fn test_block_comment_across_lines_ends_statement() {
        assert_eq!(
            kinds("package p\n/* hi */\nx /* a\nb */ y /* * ** */ z"),
            vec![
                Token::Package,
                Token::Ident("p".into()),
                Token::Semi,
                Token::Ident("x".into()),
                Token::Semi,
                Token::Ident("y".into()),
                Token::Ident("z".into()),
                Token::Semi
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment_is_error() {
        let err = tokenize("x /* never closed").unwrap_err();
        assert_eq!(err.kind(), "Lexer");
    }

    #[test]
    fn test_string_literal_unquoted() {
        let tokens = tokenize(r#"import b "bar""#).unwrap();
        assert_eq!(tokens[2].0, Token::StringLit("bar".into()));
        assert_eq!(tokens[2].1, Span::new(9, 14));
    }

    #[test]
    fn test_addressable_marker() {
        assert_eq!(
            kinds("r! := x"),
            vec![
                Token::Ident("r".into()),
                Token::Bang,
                Token::ColonEq,
                Token::Ident("x".into()),
                Token::Semi
            ]
        );
    }

    #[test]
    fn test_unexpected_character_error() {
        let err = tokenize("`").unwrap_err();
        assert!(err.message().contains("unexpected character"));
    }
}
