use crate::ast::{self, Const, Expr, ExprX, Ident, Program};
use crate::ast_util::typ_to_sort;
use num_bigint::BigInt;
use smtio::term::{
    self, mk_and, mk_app, mk_eq, mk_forall, mk_frac, mk_implies, mk_int, mk_ite, mk_le, mk_let,
    mk_lt, mk_not, mk_or, mk_perm_at_most, mk_perm_less, mk_perm_minus, mk_perm_plus,
    mk_perm_times, mk_sub, mk_unary, no_perm, Sort, SortX, Term, TermX,
};
use smtio::term_util::{mk_fun, sort_binders};
use std::collections::HashMap;
use std::sync::Arc;

fn is_perm(t: &Term) -> bool {
    matches!(&*t.sort(), SortX::Perm)
}

/// Coerce an integer operand into a permission where mixed arithmetic
/// requires it.
fn to_perm(t: &Term) -> Term {
    if is_perm(t) {
        t.clone()
    } else {
        mk_frac(t, &mk_int(1))
    }
}

pub(crate) fn lower_unary(op: ast::UnaryOp, t: &Term) -> Term {
    use ast::UnaryOp::*;
    match op {
        Not => mk_not(t),
        Neg => {
            if is_perm(t) {
                mk_perm_minus(&no_perm(), t)
            } else {
                mk_sub(&mk_int(0), t)
            }
        }
        SetCard => mk_unary(term::UnaryOp::SetCard, t),
        SeqLen => mk_unary(term::UnaryOp::SeqLen, t),
        MultisetCard => mk_unary(term::UnaryOp::MultisetCard, t),
        SetSingleton => mk_unary(term::UnaryOp::SingletonSet, t),
        SeqSingleton => mk_unary(term::UnaryOp::SingletonSeq, t),
        MultisetSingleton => mk_unary(term::UnaryOp::SingletonMultiset, t),
    }
}

/// Sort-directed lowering of a binary operation; permission-typed operands
/// select the permission combinators.
pub(crate) fn lower_binary(op: ast::BinaryOp, t1: &Term, t2: &Term) -> Term {
    use ast::BinaryOp::*;
    let permish = || is_perm(t1) || is_perm(t2);
    match op {
        And => mk_and(&[t1.clone(), t2.clone()]),
        Or => mk_or(&[t1.clone(), t2.clone()]),
        Implies => mk_implies(t1, t2),
        Eq => mk_eq(t1, t2),
        Ne => mk_not(&mk_eq(t1, t2)),
        Lt => {
            if permish() {
                mk_perm_less(&to_perm(t1), &to_perm(t2))
            } else {
                mk_lt(t1, t2)
            }
        }
        Le => {
            if permish() {
                mk_perm_at_most(&to_perm(t1), &to_perm(t2))
            } else {
                mk_le(t1, t2)
            }
        }
        Gt => {
            if permish() {
                mk_perm_less(&to_perm(t2), &to_perm(t1))
            } else {
                mk_lt(t2, t1)
            }
        }
        Ge => {
            if permish() {
                mk_perm_at_most(&to_perm(t2), &to_perm(t1))
            } else {
                mk_le(t2, t1)
            }
        }
        Add => {
            if permish() {
                mk_perm_plus(&to_perm(t1), &to_perm(t2))
            } else {
                term::mk_add(t1, t2)
            }
        }
        Sub => {
            if permish() {
                mk_perm_minus(&to_perm(t1), &to_perm(t2))
            } else {
                mk_sub(t1, t2)
            }
        }
        Mul => {
            if permish() {
                mk_perm_times(&to_perm(t1), &to_perm(t2))
            } else {
                term::mk_mul(t1, t2)
            }
        }
        Div => {
            if is_perm(t1) {
                mk_perm_times(t1, &mk_frac(&mk_int(1), t2))
            } else {
                term::mk_binary(term::BinaryOp::EuclideanDiv, t1, t2)
            }
        }
        Mod => term::mk_binary(term::BinaryOp::EuclideanMod, t1, t2),
        Frac => mk_frac(t1, t2),
        SetIn => term::mk_binary(term::BinaryOp::SetIn, t1, t2),
        SetAdd => term::mk_binary(term::BinaryOp::SetAdd, t1, t2),
        SetUnion => term::mk_binary(term::BinaryOp::SetUnion, t1, t2),
        SetIntersection => term::mk_binary(term::BinaryOp::SetIntersection, t1, t2),
        SetDifference => term::mk_binary(term::BinaryOp::SetDifference, t1, t2),
        SetSubset => term::mk_binary(term::BinaryOp::SetSubset, t1, t2),
        SeqAppend => term::mk_binary(term::BinaryOp::SeqAppend, t1, t2),
        SeqIndex => term::mk_binary(term::BinaryOp::SeqIndex, t1, t2),
        SeqTake => term::mk_binary(term::BinaryOp::SeqTake, t1, t2),
        SeqDrop => term::mk_binary(term::BinaryOp::SeqDrop, t1, t2),
        MultisetUnion => term::mk_binary(term::BinaryOp::MultisetUnion, t1, t2),
        MultisetCount => term::mk_binary(term::BinaryOp::MultisetCount, t1, t2),
    }
}

pub(crate) fn lower_const(c: &Const) -> Term {
    match c {
        Const::Bool(b) => term::mk_bool(*b),
        Const::Int(s) => {
            let i = s.parse::<BigInt>().expect("internal error: malformed integer literal");
            mk_int(i)
        }
        Const::Null => term::mk_null(),
        Const::NoPerm => no_perm(),
        Const::FullPerm => term::full_perm(),
        Const::EmptySet(t) => {
            Arc::new(TermX::Const(term::Constant::EmptySet(typ_to_sort(t))))
        }
        Const::EmptySeq(t) => {
            Arc::new(TermX::Const(term::Constant::EmptySeq(typ_to_sort(t))))
        }
        Const::EmptyMultiset(t) => {
            Arc::new(TermX::Const(term::Constant::EmptyMultiset(typ_to_sort(t))))
        }
    }
}

/// Side-effect-free translator from pure AST expressions (e.g. domain
/// axioms) to terms.  Heap-dependent expressions are programmer errors here.
pub struct PureTranslator<'a> {
    program: &'a Program,
    qid_counter: u64,
}

impl<'a> PureTranslator<'a> {
    pub fn new(program: &'a Program) -> Self {
        PureTranslator { program, qid_counter: 0 }
    }

    pub fn translate(
        &mut self,
        expr: &Expr,
        var_sort: &dyn Fn(&Ident) -> Option<Sort>,
    ) -> Term {
        self.translate_rec(expr, var_sort, &mut HashMap::new())
    }

    fn translate_rec(
        &mut self,
        expr: &Expr,
        var_sort: &dyn Fn(&Ident) -> Option<Sort>,
        bound: &mut HashMap<Ident, Sort>,
    ) -> Term {
        match &expr.x {
            ExprX::Const(c) => lower_const(c),
            ExprX::Var(x) => {
                let sort = bound.get(x).cloned().or_else(|| var_sort(x)).unwrap_or_else(|| {
                    panic!("internal error: unbound variable {} in pure context", x)
                });
                Arc::new(TermX::Var(x.clone(), sort))
            }
            ExprX::Unary(op, e) => {
                let t = self.translate_rec(e, var_sort, bound);
                lower_unary(*op, &t)
            }
            ExprX::Binary(op, e1, e2) => {
                let t1 = self.translate_rec(e1, var_sort, bound);
                let t2 = self.translate_rec(e2, var_sort, bound);
                lower_binary(*op, &t1, &t2)
            }
            ExprX::CondExp(c, t, e) => {
                let tc = self.translate_rec(c, var_sort, bound);
                let tt = self.translate_rec(t, var_sort, bound);
                let te = self.translate_rec(e, var_sort, bound);
                mk_ite(&tc, &tt, &te)
            }
            ExprX::Let(x, e1, e2) => {
                let t1 = self.translate_rec(e1, var_sort, bound);
                let shadowed = bound.insert(x.clone(), t1.sort());
                let t2 = self.translate_rec(e2, var_sort, bound);
                match shadowed {
                    Some(s) => {
                        bound.insert(x.clone(), s);
                    }
                    None => {
                        bound.remove(x);
                    }
                }
                mk_let(x, &t1, &t2)
            }
            ExprX::SeqUpdate(e1, e2, e3) => {
                let t1 = self.translate_rec(e1, var_sort, bound);
                let t2 = self.translate_rec(e2, var_sort, bound);
                let t3 = self.translate_rec(e3, var_sort, bound);
                Arc::new(TermX::SeqUpdate(t1, t2, t3))
            }
            ExprX::Forall(params, body) => {
                let mut shadowed: Vec<(Ident, Option<Sort>)> = Vec::new();
                let mut binder_sorts: Vec<(Ident, Sort)> = Vec::new();
                for p in params.iter() {
                    let sort = typ_to_sort(&p.typ);
                    shadowed.push((p.name.clone(), bound.insert(p.name.clone(), sort.clone())));
                    binder_sorts.push((p.name.clone(), sort));
                }
                let t_body = self.translate_rec(body, var_sort, bound);
                for (x, s) in shadowed {
                    match s {
                        Some(s) => {
                            bound.insert(x, s);
                        }
                        None => {
                            bound.remove(&x);
                        }
                    }
                }
                let qid = Arc::new(format!(
                    "{}-{}",
                    crate::def::QID_USER,
                    self.next_qid()
                ));
                mk_forall(
                    &sort_binders(&binder_sorts),
                    &smtio::term_util::no_triggers(),
                    &qid,
                    &t_body,
                )
            }
            ExprX::FuncApp(name, args) => {
                let function = self.program.function(name).unwrap_or_else(|| {
                    panic!("internal error: unknown function {} in pure context", name)
                });
                let arg_sorts: Vec<Sort> =
                    function.typs.iter().map(|t| typ_to_sort(t)).collect();
                let fun = mk_fun(name, &arg_sorts, &typ_to_sort(&function.ret));
                let t_args: Vec<Term> =
                    args.iter().map(|a| self.translate_rec(a, var_sort, bound)).collect();
                mk_app(&fun, &t_args)
            }
            ExprX::FieldAccess(..)
            | ExprX::Acc(..)
            | ExprX::QuantifiedPermission(..)
            | ExprX::MagicWand(..)
            | ExprX::InhaleExhale(..) => {
                panic!(
                    "internal error: heap-dependent expression in pure translator: {}",
                    expr.span.as_string
                )
            }
        }
    }

    fn next_qid(&mut self) -> u64 {
        let n = self.qid_counter;
        self.qid_counter += 1;
        n
    }
}
