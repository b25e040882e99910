// expr.rs — Template expression parser and evaluator
//
// Parses directive arguments into a small expression tree (chumsky
// combinators over the `logos` token stream) and evaluates it against a
// `Scope` supplied by the instance being generated.
//
// Preconditions: none.
// Postconditions: `parse` consumes the whole input or fails.
// Failure modes: syntax errors → `Err(String)`; unknown names, bad call
//                arity or non-finite results → `Err(String)` from `eval`.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use super::lexer::{self, Token};
use crate::units;

// ── Tree ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    /// Bare identifier: a port name inside predicate calls, a local
    /// otherwise.
    Ident(String),
    /// `table.key`, e.g. `param.freq`.
    Ref(String, String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Parse one expression. Lex errors are reported before parse errors.
pub fn parse(source: &str) -> Result<Expr, String> {
    let (tokens, errors) = lexer::lex(source);
    if let Some(e) = errors.first() {
        return Err(e.message.clone());
    }
    let len = source.len();
    let token_iter = tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = span.into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    expr_parser()
        .then_ignore(end())
        .parse(stream)
        .into_result()
        .map_err(|errs| {
            errs.iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        })
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

fn expr_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        let ident = select! { Token::Ident(s) => s };

        // ── Atoms ──

        let number = select! { Token::Number(n) => Expr::Num(n) };

        let call = ident
            .clone()
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(|(name, args)| Expr::Call(name, args));

        let reference = ident
            .clone()
            .then_ignore(just(Token::Dot))
            .then(ident.clone())
            .map(|(table, key)| Expr::Ref(table, key));

        let atom = choice((
            number,
            call,
            reference,
            ident.map(Expr::Ident),
            expr.delimited_by(just(Token::LParen), just(Token::RParen)),
        ))
        .boxed();

        // ── Operators, tightest first ──

        let unary = choice((just(Token::Minus).to(UnOp::Neg), just(Token::Bang).to(UnOp::Not)))
            .repeated()
            .foldr(atom, |op, rhs| Expr::Unary(op, Box::new(rhs)))
            .boxed();

        let product = unary
            .clone()
            .foldl(
                choice((just(Token::Star).to(BinOp::Mul), just(Token::Slash).to(BinOp::Div)))
                    .then(unary)
                    .repeated(),
                |lhs, (op, rhs)| binary(op, lhs, rhs),
            )
            .boxed();

        let sum = product
            .clone()
            .foldl(
                choice((just(Token::Plus).to(BinOp::Add), just(Token::Minus).to(BinOp::Sub)))
                    .then(product)
                    .repeated(),
                |lhs, (op, rhs)| binary(op, lhs, rhs),
            )
            .boxed();

        let comparison = sum
            .clone()
            .foldl(
                choice((
                    just(Token::EqEq).to(BinOp::Eq),
                    just(Token::NotEq).to(BinOp::Ne),
                    just(Token::LtEq).to(BinOp::Le),
                    just(Token::GtEq).to(BinOp::Ge),
                    just(Token::Lt).to(BinOp::Lt),
                    just(Token::Gt).to(BinOp::Gt),
                ))
                .then(sum)
                .repeated(),
                |lhs, (op, rhs)| binary(op, lhs, rhs),
            )
            .boxed();

        let conjunction = comparison
            .clone()
            .foldl(
                just(Token::AndAnd).to(BinOp::And).then(comparison).repeated(),
                |lhs, (op, rhs)| binary(op, lhs, rhs),
            )
            .boxed();

        conjunction.clone().foldl(
            just(Token::OrOr).to(BinOp::Or).then(conjunction).repeated(),
            |lhs, (op, rhs)| binary(op, lhs, rhs),
        )
    })
}

// ── Evaluation ──────────────────────────────────────────────────────────────

/// Name resolution for one block instance.
pub trait Scope {
    /// `table.key` for the `param`, `display` and `local` tables.
    fn lookup(&self, table: &str, key: &str) -> Result<f64, String>;
    /// `connected(port)`, `forwarded(port)`, `preserve(port)`.
    fn predicate(&self, name: &str, port: &str) -> Result<bool, String>;
    fn sample_rate(&self) -> f64;
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    pub fn eval(&self, scope: &dyn Scope) -> Result<f64, String> {
        let value = self.eval_inner(scope)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("expression evaluates to {value}"))
        }
    }

    pub fn eval_bool(&self, scope: &dyn Scope) -> Result<bool, String> {
        Ok(self.eval(scope)? != 0.0)
    }

    fn eval_inner(&self, scope: &dyn Scope) -> Result<f64, String> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::Ident(name) => match name.as_str() {
                "true" => Ok(1.0),
                "false" => Ok(0.0),
                "pi" => Ok(std::f64::consts::PI),
                "sample_rate" => Ok(scope.sample_rate()),
                _ => scope.lookup("local", name),
            },
            Expr::Ref(table, key) => scope.lookup(table, key),
            Expr::Unary(UnOp::Neg, e) => Ok(-e.eval_inner(scope)?),
            Expr::Unary(UnOp::Not, e) => Ok(truth(e.eval_inner(scope)? == 0.0)),
            Expr::Binary(op, l, r) => {
                let a = l.eval_inner(scope)?;
                // Short-circuit so guarded lookups stay legal.
                match op {
                    BinOp::And if a == 0.0 => return Ok(0.0),
                    BinOp::Or if a != 0.0 => return Ok(1.0),
                    _ => {}
                }
                let b = r.eval_inner(scope)?;
                Ok(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => {
                        if b == 0.0 {
                            return Err("division by zero".to_string());
                        }
                        a / b
                    }
                    BinOp::Eq => truth(units::approx_eq(a, b)),
                    BinOp::Ne => truth(!units::approx_eq(a, b)),
                    BinOp::Lt => truth(a < b),
                    BinOp::Le => truth(a <= b),
                    BinOp::Gt => truth(a > b),
                    BinOp::Ge => truth(a >= b),
                    BinOp::And | BinOp::Or => truth(b != 0.0),
                })
            }
            Expr::Call(name, args) => call(name, args, scope),
        }
    }
}

fn call(name: &str, args: &[Expr], scope: &dyn Scope) -> Result<f64, String> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{name}() takes {n} argument(s), got {}", args.len()))
        }
    };
    match name {
        "connected" | "forwarded" | "preserve" => {
            arity(1)?;
            match &args[0] {
                Expr::Ident(port) => Ok(truth(scope.predicate(name, port)?)),
                _ => Err(format!("{name}() expects a port name")),
            }
        }
        "min" | "max" => {
            arity(2)?;
            let a = args[0].eval_inner(scope)?;
            let b = args[1].eval_inner(scope)?;
            Ok(if name == "min" { a.min(b) } else { a.max(b) })
        }
        "abs" | "round" | "ceil" | "floor" => {
            arity(1)?;
            let v = args[0].eval_inner(scope)?;
            Ok(match name {
                "abs" => v.abs(),
                "round" => v.round(),
                "ceil" => v.ceil(),
                _ => v.floor(),
            })
        }
        _ => match units::by_name(name) {
            Some(f) => {
                arity(1)?;
                Ok(f(args[0].eval_inner(scope)?, scope.sample_rate()))
            }
            None => Err(format!("unknown function '{name}'")),
        },
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapScope {
        values: HashMap<(String, String), f64>,
        connected: Vec<String>,
    }

    impl MapScope {
        fn new() -> Self {
            let mut values = HashMap::new();
            values.insert(("param".to_string(), "mix".to_string()), 0.5);
            values.insert(("display".to_string(), "mode".to_string()), 2.0);
            values.insert(("local".to_string(), "n".to_string()), 4.0);
            MapScope {
                values,
                connected: vec!["in".to_string()],
            }
        }
    }

    impl Scope for MapScope {
        fn lookup(&self, table: &str, key: &str) -> Result<f64, String> {
            self.values
                .get(&(table.to_string(), key.to_string()))
                .copied()
                .ok_or_else(|| format!("unknown {table}.{key}"))
        }

        fn predicate(&self, name: &str, port: &str) -> Result<bool, String> {
            match name {
                "connected" => Ok(self.connected.iter().any(|p| p == port)),
                _ => Ok(false),
            }
        }

        fn sample_rate(&self) -> f64 {
            32_768.0
        }
    }

    fn eval(src: &str) -> f64 {
        parse(src).unwrap().eval(&MapScope::new()).unwrap()
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3"), 7.0);
        assert_eq!(eval("(1 + 2) * 3"), 9.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("-2 * -3"), 6.0);
    }

    #[test]
    fn references_and_locals() {
        assert_eq!(eval("param.mix * 2"), 1.0);
        assert_eq!(eval("n + 1"), 5.0);
        assert_eq!(eval("local.n"), 4.0);
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("display.mode == 2"), 1.0);
        assert_eq!(eval("display.mode == 1 || display.mode >= 2"), 1.0);
        assert_eq!(eval("!connected(in)"), 0.0);
        assert_eq!(eval("connected(side) && param.missing > 0"), 0.0);
    }

    #[test]
    fn builtin_functions() {
        assert_eq!(eval("max(1, min(5, 3))"), 3.0);
        assert_eq!(eval("ceil(2.1) + floor(2.9) + round(0.5)"), 6.0);
        assert_eq!(eval("ms_to_samples(1000)"), 32_768.0);
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(parse("1 +").is_err());
        assert!(parse("(1").is_err());
        assert!(parse("1 $ 2").is_err());
    }

    #[test]
    fn any_nonzero_value_is_true() {
        let scope = MapScope::new();
        assert!(parse("0.25").unwrap().eval_bool(&scope).unwrap());
        assert!(parse("0 - 3").unwrap().eval_bool(&scope).unwrap());
        assert!(!parse("1 - 1").unwrap().eval_bool(&scope).unwrap());
        assert!(parse("1 / 0").unwrap().eval_bool(&scope).is_err());
    }

    #[test]
    fn eval_errors_are_reported() {
        let scope = MapScope::new();
        assert!(parse("1 / 0").unwrap().eval(&scope).is_err());
        assert!(parse("param.nope").unwrap().eval(&scope).is_err());
        assert!(parse("nosuch(1)").unwrap().eval(&scope).is_err());
        assert!(parse("connected(1)").unwrap().eval(&scope).is_err());
        assert!(parse("min(1)").unwrap().eval(&scope).is_err());
    }
}
