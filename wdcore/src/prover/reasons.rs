//! Named proof strategies for `assert ... via "rule"(args)`.
//!
//! A rule reads `conclusion: premise; premise`. The conclusion is matched
//! against the asserted condition, binding the placeholders `a` and `b`;
//! placeholders that only appear in premises are bound by the arguments of
//! the assertion. Each premise then becomes an obligation of its own.
use std::collections::BTreeMap;

use wdinstr::modules::{int::BinaryOp, operand::Name};

use crate::facts::Term;

/// Every rule understood by the checker.
pub const RULES: [&str; 5] = [
    "a < b: a < c; c <= b",
    "a < b: a <= c; c < b",
    "a <= b: a <= c; c <= b",
    "a < (b + c): a < c; 0 <= b",
    "(a + b) <= c: a <= (c - b)",
];

fn split(t: &Term, op: BinaryOp) -> Result<(&Term, &Term), String> {
    match t {
        Term::Binary(o, l, r) if *o == op => Ok((l, r)),
        _ => Err(format!("`{}` is not of the form `_ {} _`", t, op.to_str())),
    }
}

fn cmp(op: BinaryOp, l: &Term, r: &Term) -> Term {
    Term::binary(op, l.clone(), r.clone())
}

/// Premises `rule` needs in order to conclude `cond`.
pub fn premises(rule: &str, cond: &Term, args: &BTreeMap<Name, Term>) -> Result<Vec<Term>, String> {
    let arg = |name: &str| {
        args.get(name)
            .ok_or_else(|| format!("rule \"{}\" needs an argument named `{}`", rule, name))
    };
    let (lt, le) = (BinaryOp::Lt, BinaryOp::Le);
    match rule {
        "a < b: a < c; c <= b" => {
            let (a, b) = split(cond, lt)?;
            let c = arg("c")?;
            Ok(vec![cmp(lt, a, c), cmp(le, c, b)])
        }
        "a < b: a <= c; c < b" => {
            let (a, b) = split(cond, lt)?;
            let c = arg("c")?;
            Ok(vec![cmp(le, a, c), cmp(lt, c, b)])
        }
        "a <= b: a <= c; c <= b" => {
            let (a, b) = split(cond, le)?;
            let c = arg("c")?;
            Ok(vec![cmp(le, a, c), cmp(le, c, b)])
        }
        "a < (b + c): a < c; 0 <= b" => {
            let (a, sum) = split(cond, lt)?;
            let (b, c) = split(sum, BinaryOp::Add)?;
            Ok(vec![cmp(lt, a, c), cmp(le, &Term::int(0), b)])
        }
        "(a + b) <= c: a <= (c - b)" => {
            let (sum, c) = split(cond, le)?;
            let (a, b) = split(sum, BinaryOp::Add)?;
            let diff = Term::binary(BinaryOp::Sub, c.clone(), b.clone());
            Ok(vec![cmp(le, a, &diff)])
        }
        _ => Err(format!("unknown proof rule \"{}\"", rule)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitivity_binds_the_middle_term() {
        let cond = Term::binary(BinaryOp::Lt, Term::var("i"), Term::var("n"));
        let args = BTreeMap::from([("c".to_string(), Term::var("m"))]);
        let ps = premises(RULES[0], &cond, &args).unwrap();
        let rendered: Vec<_> = ps.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["i < m", "m <= n"]);
    }

    #[test]
    fn sums_move_to_the_other_side() {
        let sum = Term::binary(BinaryOp::Add, Term::var("i"), Term::int(4));
        let cond = Term::binary(BinaryOp::Le, sum, Term::var("n"));
        let ps = premises(RULES[4], &cond, &BTreeMap::new()).unwrap();
        assert_eq!(ps.len(), 1);
        assert_eq!(ps[0].to_string(), "i <= n - 4");
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let cond = Term::binary(BinaryOp::Le, Term::var("i"), Term::var("n"));
        assert!(premises(RULES[0], &cond, &BTreeMap::new()).is_err());
        assert!(premises("a == b: b == a", &cond, &BTreeMap::new()).is_err());
    }
}
