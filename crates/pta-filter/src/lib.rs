//! Tokenizer and adjacency validator for the `-S` compound filter syntax.
//!
//! This is a small, peripheral component: a caller hands us the argument
//! vector it received after a `-S`/`--select` flag, already split on
//! whitespace by the shell, and we classify each argument into a token
//! kind, then check that the sequence forms a legal boolean expression
//! over statements. We do not evaluate the expression; a separate
//! collaborator does that once the tokens are known to be well-formed.

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// The kind of a single token in a filter expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A plain fact/class/identity statement, e.g. `fact=value`.
    Statement,
    /// A function-style statement, e.g. `with_fact(os.family=RedHat)`.
    FStatement,
    And,
    Or,
    Not,
    LParen,
    RParen,
    /// Could not be classified as any of the above (e.g. unbalanced quotes).
    BadToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub span: (usize, usize),
}

/// One bucket of parse failure, matching the three diagnostic categories
/// the original filter parser reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    BadToken,
    Parse,
    UnbalancedParenthesis,
}

#[derive(Debug, Error, Diagnostic)]
#[error("filter expression is invalid")]
pub struct FilterError {
    #[source_code]
    pub src: NamedSource<String>,
    #[related]
    pub problems: Vec<FilterProblem>,
}

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct FilterProblem {
    pub kind: FailureKind,
    pub message: String,
    #[label("{message}")]
    pub span: SourceSpan,
}

fn classify(arg: &str) -> TokenKind {
    match arg {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "(" => TokenKind::LParen,
        ")" => TokenKind::RParen,
        _ => {
            if arg.chars().filter(|&c| c == '\'' || c == '"').count() % 2 != 0 {
                TokenKind::BadToken
            } else if is_function_statement(arg) {
                TokenKind::FStatement
            } else if !arg.is_empty() {
                TokenKind::Statement
            } else {
                TokenKind::BadToken
            }
        }
    }
}

fn is_function_statement(arg: &str) -> bool {
    let Some(open) = arg.find('(') else {
        return false;
    };
    let name = &arg[..open];
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && arg.ends_with(')')
}

/// Tokenize the already-shell-split argument vector. Tokens are joined
/// with a single space in the reconstructed source text used for
/// diagnostics, so byte offsets line up with what a user would see if the
/// original command line were echoed back.
pub fn tokenize(args: &[String]) -> (String, Vec<Token>) {
    let mut source = String::new();
    let mut tokens = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            source.push(' ');
        }
        let start = source.len();
        source.push_str(arg);
        let end = source.len();
        tokens.push(Token {
            kind: classify(arg),
            value: arg.clone(),
            span: (start, end),
        });
    }
    (source, tokens)
}

/// Legal predecessor kinds for each token kind, per the grammar in the
/// spec. `None` for "start of input" is handled separately below.
fn legal_successors(kind: TokenKind) -> &'static [TokenKind] {
    use TokenKind::*;
    match kind {
        And | Or => &[Not, Statement, FStatement, LParen],
        Not => &[Statement, FStatement, LParen, Not],
        Statement | FStatement => &[And, Or, RParen],
        LParen => &[Statement, FStatement, Not, LParen],
        RParen => &[And, Or],
        BadToken => &[],
    }
}

/// Tokenize and validate a filter expression, given as an already
/// shell-split argument vector.
///
/// On success, returns the sequence of tokens in original order. On
/// failure, returns a `FilterError` whose `problems` are grouped by
/// `FailureKind` and carry a labeled span over the reconstructed source.
pub fn parse(args: &[String]) -> Result<Vec<Token>, FilterError> {
    let (source, tokens) = tokenize(args);
    let mut problems = Vec::new();
    let mut paren_depth: i32 = 0;
    let mut previous: Option<TokenKind> = None;

    for token in &tokens {
        let span = SourceSpan::new(token.span.0.into(), token.span.1 - token.span.0);

        if token.kind == TokenKind::BadToken {
            problems.push(FilterProblem {
                kind: FailureKind::BadToken,
                message: format!("malformed token `{}`", token.value),
                span,
            });
            previous = Some(token.kind);
            continue;
        }

        match token.kind {
            TokenKind::LParen => paren_depth += 1,
            TokenKind::RParen => {
                if paren_depth == 0 {
                    problems.push(FilterProblem {
                        kind: FailureKind::UnbalancedParenthesis,
                        message: "unmatched closing parenthesis".to_string(),
                        span,
                    });
                } else {
                    paren_depth -= 1;
                }
            }
            _ => {}
        }

        let legal_here = match previous {
            None => matches!(
                token.kind,
                TokenKind::Statement
                    | TokenKind::FStatement
                    | TokenKind::Not
                    | TokenKind::LParen
            ),
            Some(prev) => legal_successors(prev).contains(&token.kind),
        };

        if !legal_here {
            let after = previous
                .map(|p| format!("{p:?}"))
                .unwrap_or_else(|| "the start of the expression".to_string());
            problems.push(FilterProblem {
                kind: FailureKind::Parse,
                message: format!("`{}` cannot follow {}", token.value, after),
                span,
            });
        }

        previous = Some(token.kind);
    }

    if paren_depth > 0 {
        let end = source.len();
        problems.push(FilterProblem {
            kind: FailureKind::UnbalancedParenthesis,
            message: "unclosed parenthesis".to_string(),
            span: SourceSpan::new(end.into(), 0),
        });
    }

    match previous {
        Some(TokenKind::And) | Some(TokenKind::Or) | Some(TokenKind::Not) => {
            problems.push(FilterProblem {
                kind: FailureKind::Parse,
                message: "expression cannot end with a dangling operator".to_string(),
                span: SourceSpan::new(source.len().into(), 0),
            });
        }
        _ => {}
    }

    if problems.is_empty() {
        Ok(tokens)
    } else {
        Err(FilterError {
            src: NamedSource::new("filter", source),
            problems,
        })
    }
}
