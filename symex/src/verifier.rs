use crate::ast::{
    Const, Expr, ExprX, Ident, LocX, Method, Program, Span, Stmt, StmtX, Typ,
};
use crate::ast_util::typ_to_sort;
use crate::config::Config;
use crate::consume::{consume, consume_all};
use crate::decider::Decider;
use crate::produce::{produce, produce_all, ProduceCont};
use crate::recorder::FunctionRecorder;
use crate::results::{
    ErrorContext, ErrorKind, Failures, VerificationError, VerificationResult,
};
use crate::snapshots;
use crate::state::State;
use crate::translate::PureTranslator;
use smtio::printer::{node_to_string, sort_id, sort_to_node};
use smtio::prover::{Prover, ProverError};
use smtio::term::{DeclX, Fun, Sort, SortX};
use smtio::term_util::{mk_fun, ref_sort, set_sort, snap_sort};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

pub fn prover_failure(
    pve: &ErrorContext,
    span: &Span,
    e: &dyn std::fmt::Display,
) -> VerificationResult {
    VerificationResult::Failure(Failures {
        errors: vec![VerificationError {
            kind: ErrorKind::ProverInteraction,
            pos: span.as_string.clone(),
            context: format!("{} ({})", pve.text, e),
        }],
        fatal: true,
    })
}

/// Per-program verifier: owns the decider, the function recorder, and the
/// solver-side preamble bookkeeping.  Each method is verified in its own
/// solver scope over a fresh symbolic state.
pub struct Verifier {
    pub config: Arc<Config>,
    pub program: Program,
    pub decider: Decider,
    pub recorder: FunctionRecorder,
    declared: HashSet<String>,
    qid_counter: u64,
}

impl Verifier {
    pub fn new(
        config: Arc<Config>,
        program: Program,
        prover: Box<dyn Prover>,
    ) -> Result<Verifier, ProverError> {
        let decider = Decider::new(config.clone(), prover)?;
        let mut v = Verifier {
            config,
            program: program.clone(),
            decider,
            recorder: FunctionRecorder::new(),
            declared: HashSet::new(),
            qid_counter: 0,
        };
        v.emit_prelude()?;
        for typ in collect_program_typs(&program) {
            v.ensure_typ(&typ)?;
        }
        for field in program.fields.iter() {
            v.ensure_snap_wrappers(&typ_to_sort(&field.typ))?;
        }
        for function in program.functions.iter() {
            let arg_sorts: Vec<Sort> = function.typs.iter().map(|t| typ_to_sort(t)).collect();
            let fun = mk_fun(&function.name, &arg_sorts, &typ_to_sort(&function.ret));
            v.decider.declare(&Arc::new(DeclX::Fun(fun)))?;
        }
        let mut translator = PureTranslator::new(&program);
        for axiom in program.axioms.iter() {
            let t = translator.translate(axiom, &|_| None);
            v.decider.assume(&[t])?;
        }
        Ok(v)
    }

    fn emit_prelude(&mut self) -> Result<(), ProverError> {
        let prover = self.decider.prover();
        prover.comment("prelude");
        prover.emit_raw("(declare-sort $Ref 0)")?;
        prover.emit_raw("(declare-const $Ref.null $Ref)")?;
        prover.emit_raw(
            "(declare-datatypes (($Snap 0)) ((($Snap.unit) \
             ($Snap.combine ($Snap.first $Snap) ($Snap.second $Snap)))))",
        )?;
        prover.emit_raw(
            "(define-fun $Perm.min ((p1 Real) (p2 Real)) Real (ite (<= p1 p2) p1 p2))",
        )?;
        Ok(())
    }

    pub fn fresh_qid(&mut self, prefix: &str) -> Ident {
        let n = self.qid_counter;
        self.qid_counter += 1;
        Arc::new(format!("{}@{}", prefix, n))
    }

    pub fn predicate_arg_sorts(&self, name: &Ident) -> Vec<Sort> {
        match self.program.predicate(name) {
            Some(p) => p.params.iter().map(|p| typ_to_sort(&p.typ)).collect(),
            None => panic!("internal error: unknown predicate {}", name),
        }
    }

    fn is_new(&mut self, key: String) -> bool {
        self.declared.insert(key)
    }

    pub fn ensure_typ(&mut self, typ: &Typ) -> Result<(), ProverError> {
        self.ensure_sort(&typ_to_sort(typ))
    }

    fn ensure_sort(&mut self, sort: &Sort) -> Result<(), ProverError> {
        match &**sort {
            SortX::Seq(elem) | SortX::Set(elem) | SortX::Multiset(elem) => {
                self.ensure_sort(elem)?;
                self.ensure_collection(sort)
            }
            _ => Ok(()),
        }
    }

    /// Declare a Seq/Set/Multiset instantiation: sort, operations, and the
    /// basic membership/cardinality axioms.
    fn ensure_collection(&mut self, sort: &Sort) -> Result<(), ProverError> {
        let key = format!("coll:{}", sort_id(sort));
        if !self.is_new(key) {
            return Ok(());
        }
        let (elem, kind) = match &**sort {
            SortX::Set(e) => (e, "Set"),
            SortX::Seq(e) => (e, "Seq"),
            SortX::Multiset(e) => (e, "Multiset"),
            _ => panic!("internal error: not a collection sort"),
        };
        // symbol mangling uses the sort id; declarations use the rendered
        // sort ($Perm elements render as Real)
        let e = sort_id(elem);
        let ed = node_to_string(&sort_to_node(elem));
        let s = sort_id(sort);
        let prover = self.decider.prover();
        prover.emit_raw(&format!("(declare-sort {} 0)", s))?;
        match kind {
            "Set" => {
                prover.emit_raw(&format!("(declare-const Set_empty<{e}> {s})", e = e, s = s))?;
                prover.emit_raw(&format!(
                    "(declare-fun Set_in<{e}> ({ed} {s}) Bool)",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Set_singleton<{e}> ({ed}) {s})",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Set_add<{e}> ({s} {ed}) {s})",
                    e = e, ed = ed, s = s
                ))?;
                for op in ["union", "intersection", "difference"] {
                    prover.emit_raw(&format!(
                        "(declare-fun Set_{op}<{e}> ({s} {s}) {s})",
                        op = op, e = e, s = s
                    ))?;
                }
                prover.emit_raw(&format!(
                    "(declare-fun Set_subset<{e}> ({s} {s}) Bool)",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!("(declare-fun Set_card<{e}> ({s}) Int)", e = e, s = s))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((s {s})) (! (<= 0 (Set_card<{e}> s)) \
                     :pattern ((Set_card<{e}> s)))))",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((x {ed})) (! (not (Set_in<{e}> x Set_empty<{e}>)) \
                     :pattern ((Set_in<{e}> x Set_empty<{e}>)))))",
                    e = e, ed = ed
                ))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((x {ed}) (y {ed})) \
                     (! (= (Set_in<{e}> x (Set_singleton<{e}> y)) (= x y)) \
                     :pattern ((Set_in<{e}> x (Set_singleton<{e}> y))))))",
                    e = e, ed = ed
                ))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((x {ed}) (a {s}) (b {s})) \
                     (! (= (Set_in<{e}> x (Set_union<{e}> a b)) \
                     (or (Set_in<{e}> x a) (Set_in<{e}> x b))) \
                     :pattern ((Set_in<{e}> x (Set_union<{e}> a b))))))",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((x {ed}) (a {s}) (y {ed})) \
                     (! (= (Set_in<{e}> x (Set_add<{e}> a y)) \
                     (or (= x y) (Set_in<{e}> x a))) \
                     :pattern ((Set_in<{e}> x (Set_add<{e}> a y))))))",
                    e = e, ed = ed, s = s
                ))?;
            }
            "Seq" => {
                prover.emit_raw(&format!("(declare-const Seq_empty<{e}> {s})", e = e, s = s))?;
                prover.emit_raw(&format!(
                    "(declare-fun Seq_length<{e}> ({s}) Int)",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Seq_singleton<{e}> ({ed}) {s})",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Seq_index<{e}> ({s} Int) {ed})",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Seq_append<{e}> ({s} {s}) {s})",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Seq_take<{e}> ({s} Int) {s})",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Seq_drop<{e}> ({s} Int) {s})",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Seq_update<{e}> ({s} Int {ed}) {s})",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((s {s})) (! (<= 0 (Seq_length<{e}> s)) \
                     :pattern ((Seq_length<{e}> s)))))",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!("(assert (= (Seq_length<{e}> Seq_empty<{e}>) 0))", e = e))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((x {ed})) \
                     (! (= (Seq_length<{e}> (Seq_singleton<{e}> x)) 1) \
                     :pattern ((Seq_singleton<{e}> x)))))",
                    e = e, ed = ed
                ))?;
            }
            _ => {
                prover.emit_raw(&format!(
                    "(declare-const Multiset_empty<{e}> {s})",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Multiset_count<{e}> ({s} {ed}) Int)",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Multiset_card<{e}> ({s}) Int)",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Multiset_singleton<{e}> ({ed}) {s})",
                    e = e, ed = ed, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(declare-fun Multiset_union<{e}> ({s} {s}) {s})",
                    e = e, s = s
                ))?;
                prover.emit_raw(&format!(
                    "(assert (forall ((m {s}) (x {ed})) \
                     (! (<= 0 (Multiset_count<{e}> m x)) \
                     :pattern ((Multiset_count<{e}> m x)))))",
                    e = e, ed = ed, s = s
                ))?;
            }
        }
        Ok(())
    }

    /// Declare the bridge functions between a sort and $Snap.
    pub fn ensure_snap_wrappers(&mut self, sort: &Sort) -> Result<(), ProverError> {
        if matches!(&**sort, SortX::Snap) {
            return Ok(());
        }
        let snap = snap_sort();
        let from = sort_id(sort);
        let to = sort_id(&snap);
        let pairs = [(sort.clone(), snap.clone(), &from, &to), (snap, sort.clone(), &to, &from)];
        for (a, b, fa, fb) in pairs {
            let name = smtio::def::sort_wrapper_name(fa, fb);
            if self.is_new(format!("wrap:{}", name)) {
                let fun = mk_fun(&name, &[a], &b);
                self.decider.declare(&Arc::new(DeclX::Fun(fun)))?;
            }
        }
        Ok(())
    }

    /// Declare the field-value-function sort and operations for a field.
    pub fn ensure_fvf(&mut self, field: &Ident) -> Result<Sort, ProverError> {
        let value_sort = match self.program.field(field) {
            Some(f) => typ_to_sort(&f.typ),
            None => panic!("internal error: unknown field {}", field),
        };
        let sort: Sort = Arc::new(SortX::FieldValueFunction(field.clone(), value_sort.clone()));
        if self.is_new(format!("fvf:{}", field)) {
            self.ensure_collection(&set_sort(&ref_sort()))?;
            self.decider.declare(&Arc::new(DeclX::Sort(sort.clone())))?;
            let lookup = mk_fun(
                &smtio::def::fvf_lookup_name(field),
                &[sort.clone(), ref_sort()],
                &value_sort,
            );
            self.decider.declare(&Arc::new(DeclX::Fun(lookup)))?;
            let domain = mk_fun(
                &smtio::def::fvf_domain_name(field),
                &[sort.clone()],
                &set_sort(&ref_sort()),
            );
            self.decider.declare(&Arc::new(DeclX::Fun(domain)))?;
            self.ensure_snap_wrappers(&sort)?;
        }
        Ok(sort)
    }

    /// Declare the predicate-snap-function sort and operations.
    pub fn ensure_psf(&mut self, predicate: &Ident) -> Result<Sort, ProverError> {
        let arg_sorts = self.predicate_arg_sorts(predicate);
        let sort: Sort = Arc::new(SortX::PredicateSnapFunction(predicate.clone()));
        if self.is_new(format!("psf:{}", predicate)) {
            self.ensure_collection(&set_sort(&snap_sort()))?;
            self.decider.declare(&Arc::new(DeclX::Sort(sort.clone())))?;
            let mut lookup_args = vec![sort.clone()];
            lookup_args.extend(arg_sorts.iter().cloned());
            let lookup = mk_fun(
                &smtio::def::psf_lookup_name(predicate),
                &lookup_args,
                &snap_sort(),
            );
            self.decider.declare(&Arc::new(DeclX::Fun(lookup)))?;
            let domain = mk_fun(
                &smtio::def::psf_domain_name(predicate),
                &[sort.clone()],
                &set_sort(&snap_sort()),
            );
            self.decider.declare(&Arc::new(DeclX::Fun(domain)))?;
            self.ensure_snap_wrappers(&sort)?;
        }
        Ok(sort)
    }

    /// Declare the trigger function emitted when producing predicate
    /// instances.
    pub fn ensure_predicate_trigger(&mut self, predicate: &Ident) -> Result<Fun, ProverError> {
        let arg_sorts = self.predicate_arg_sorts(predicate);
        let name = crate::def::predicate_trigger_name(predicate);
        let fun = mk_fun(&name, &arg_sorts, &smtio::term_util::bool_sort());
        if self.is_new(format!("trig:{}", predicate)) {
            self.decider.declare(&Arc::new(DeclX::Fun(fun.clone())))?;
        }
        Ok(fun)
    }

    /// Verify one method: produce the precondition, execute the body's
    /// ghost statements, consume the postcondition.
    pub fn verify_method(&mut self, method: &Method) -> Vec<VerificationError> {
        let method_span = Span { as_string: format!("method {}", method.name) };
        self.decider.comment(&format!("--- verifying method {} ---", method.name));
        let pve_pre = ErrorContext::new(
            &format!("the precondition of method {} is not well-formed", method.name),
            &method_span,
        );
        if let Err(e) = self.decider.push_scope() {
            return prover_failure(&pve_pre, &method_span, &e).errors().to_vec();
        }

        let mut state = State::new();
        for p in method.params.iter() {
            match self.decider.fresh(&p.name, &typ_to_sort(&p.typ)) {
                Ok(t) => state = state.with_store(state.store.plus(&p.name, &t)),
                Err(e) => {
                    let _ = self.decider.pop_scope();
                    return prover_failure(&pve_pre, &method_span, &e).errors().to_vec();
                }
            }
        }

        let pve_post = ErrorContext::new(
            &format!("the postcondition of method {} might not hold", method.name),
            &method_span,
        );
        let body = &method.body;
        let ensures = &method.ensures;
        let result = produce_all(
            state,
            &method.requires,
            &pve_pre,
            self,
            Rc::new(move |s, v| {
                let pve_post = pve_post.clone();
                exec_stmts(
                    s,
                    body,
                    v,
                    Rc::new(move |s2, v| {
                        consume_all(
                            s2,
                            ensures,
                            &pve_post,
                            v,
                            Rc::new(|_s, _snap, _v| VerificationResult::Success),
                        )
                    }),
                )
            }),
        );

        let _ = self.decider.pop_scope();
        result.errors().to_vec()
    }

    pub fn statistics(&mut self) -> Result<Vec<(String, String)>, ProverError> {
        self.decider.statistics()
    }

    pub fn stop(&mut self) {
        let _ = self.decider.stop();
    }
}

fn exec_stmts<'a>(
    s: State,
    stmts: &'a [Stmt],
    v: &mut Verifier,
    q: ProduceCont<'a>,
) -> VerificationResult {
    match stmts.split_first() {
        None => q(s, v),
        Some((stmt, rest)) => {
            let span = stmt.span.clone();
            match &stmt.x {
                StmtX::Inhale(e) => {
                    let pve = ErrorContext::new("the inhaled assertion is not well-formed", &span);
                    let snap = match v
                        .decider
                        .fresh(crate::def::PREFIX_SNAP, &snap_sort())
                    {
                        Ok(t) => t,
                        Err(err) => return prover_failure(&pve, &span, &err),
                    };
                    produce(
                        s,
                        snapshots::fixed(snap),
                        e,
                        &pve,
                        v,
                        Rc::new(move |s2, v| exec_stmts(s2, rest, v, q.clone())),
                    )
                }
                StmtX::Exhale(e) => {
                    let pve = ErrorContext::new("the exhaled assertion might not hold", &span);
                    consume(
                        s,
                        e,
                        &pve,
                        v,
                        Rc::new(move |s2, _snap, v| exec_stmts(s2, rest, v, q.clone())),
                    )
                }
                StmtX::Assert(e) => {
                    let pve = ErrorContext::new("the asserted expression might not hold", &span);
                    // assert consumes into a scratch state; the heap is kept
                    let r = consume(
                        s.clone(),
                        e,
                        &pve,
                        v,
                        Rc::new(|_s, _snap, _v| VerificationResult::Success),
                    );
                    r.and_then(|| exec_stmts(s, rest, v, q))
                }
            }
        }
    }
}

/// Sorts mentioned anywhere in the program, so collection instantiations
/// can be declared up front.
fn collect_program_typs(program: &Program) -> Vec<Typ> {
    let mut typs: Vec<Typ> = Vec::new();
    let mut push = |t: &Typ, typs: &mut Vec<Typ>| {
        if !typs.contains(t) {
            typs.push(t.clone());
        }
    };
    for f in program.fields.iter() {
        push(&f.typ, &mut typs);
    }
    for p in program.predicates.iter() {
        for param in p.params.iter() {
            push(&param.typ, &mut typs);
        }
    }
    for f in program.functions.iter() {
        for t in f.typs.iter() {
            push(t, &mut typs);
        }
        push(&f.ret, &mut typs);
    }
    let mut exprs: Vec<Expr> = program.axioms.iter().cloned().collect();
    for m in program.methods.iter() {
        for p in m.params.iter() {
            push(&p.typ, &mut typs);
        }
        exprs.extend(m.requires.iter().cloned());
        exprs.extend(m.ensures.iter().cloned());
        for stmt in m.body.iter() {
            match &stmt.x {
                StmtX::Inhale(e) | StmtX::Exhale(e) | StmtX::Assert(e) => {
                    exprs.push(e.clone())
                }
            }
        }
    }
    while let Some(e) = exprs.pop() {
        collect_expr_typs(&e, &mut typs, &mut exprs);
    }
    typs
}

fn collect_expr_typs(expr: &Expr, typs: &mut Vec<Typ>, exprs: &mut Vec<Expr>) {
    let mut push = |t: &Typ, typs: &mut Vec<Typ>| {
        if !typs.contains(t) {
            typs.push(t.clone());
        }
    };
    match &expr.x {
        ExprX::Const(Const::EmptySet(t)) => {
            push(&Arc::new(crate::ast::TypX::Set(t.clone())), typs);
            push(t, typs);
        }
        ExprX::Const(Const::EmptySeq(t)) => {
            push(&Arc::new(crate::ast::TypX::Seq(t.clone())), typs);
            push(t, typs);
        }
        ExprX::Const(Const::EmptyMultiset(t)) => {
            push(&Arc::new(crate::ast::TypX::Multiset(t.clone())), typs);
            push(t, typs);
        }
        ExprX::Const(_) | ExprX::Var(_) => {}
        ExprX::Unary(_, e) => exprs.push(e.clone()),
        ExprX::Binary(_, e1, e2) => {
            exprs.push(e1.clone());
            exprs.push(e2.clone());
        }
        ExprX::CondExp(e1, e2, e3) | ExprX::SeqUpdate(e1, e2, e3) => {
            exprs.push(e1.clone());
            exprs.push(e2.clone());
            exprs.push(e3.clone());
        }
        ExprX::Let(_, e1, e2) => {
            exprs.push(e1.clone());
            exprs.push(e2.clone());
        }
        ExprX::FieldAccess(e, _) => exprs.push(e.clone()),
        ExprX::Acc(loc, perm) => {
            collect_loc_exprs(loc, exprs);
            exprs.push(perm.clone());
        }
        ExprX::QuantifiedPermission(params, cond, loc, perm) => {
            for p in params.iter() {
                push(&p.typ, typs);
            }
            exprs.push(cond.clone());
            collect_loc_exprs(loc, exprs);
            exprs.push(perm.clone());
        }
        ExprX::Forall(params, body) => {
            for p in params.iter() {
                push(&p.typ, typs);
            }
            exprs.push(body.clone());
        }
        ExprX::MagicWand(_, lhs, rhs) | ExprX::InhaleExhale(lhs, rhs) => {
            exprs.push(lhs.clone());
            exprs.push(rhs.clone());
        }
        ExprX::FuncApp(_, args) => {
            for a in args.iter() {
                exprs.push(a.clone());
            }
        }
    }
}

fn collect_loc_exprs(loc: &crate::ast::Loc, exprs: &mut Vec<Expr>) {
    match &**loc {
        LocX::Field(rcvr, _) => exprs.push(rcvr.clone()),
        LocX::Predicate(_, args) => {
            for a in args.iter() {
                exprs.push(a.clone());
            }
        }
    }
}

pub struct MethodResult {
    pub method: Ident,
    pub errors: Vec<VerificationError>,
}

/// Verify every method of the program with the given prover, reporting all
/// failures per method.
pub fn verify_program(
    config: &Arc<Config>,
    program: &Program,
    prover: Box<dyn Prover>,
) -> Result<Vec<MethodResult>, ProverError> {
    let mut v = Verifier::new(config.clone(), program.clone(), prover)?;
    let mut results: Vec<MethodResult> = Vec::new();
    for method in program.methods.iter() {
        let errors = v.verify_method(method);
        results.push(MethodResult { method: method.name.clone(), errors });
    }
    v.stop();
    Ok(results)
}
