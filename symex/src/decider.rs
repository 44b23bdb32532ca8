use crate::chunks::Chunk;
use crate::config::Config;
use crate::path_conditions::PathConditions;
use crate::state::State;
use smtio::prover::{Prover, ProverError, SatResult};
use smtio::term::{
    free_vars, mk_and, mk_implies, mk_perm_less, no_perm, Constant, Decl, DeclX, Fun, FunX, Ident,
    Sort, Term, TermX,
};
use smtio::term_util::perm_sort;
use std::collections::HashSet;
use std::sync::Arc;

/// The layered abstraction over the SMT solver: a path-condition stack kept
/// in lock-step with the solver's push/pop depth, a triviality cache for
/// assertions, and fresh-symbol minting.
pub struct Decider {
    prover: Box<dyn Prover>,
    pc: PathConditions,
    config: Arc<Config>,
    /// Names of abstract-read-permission variables in scope.
    arp_vars: HashSet<Ident>,
    bound_counter: u64,
    pub cache_hits: u64,
    pub num_asserts: u64,
}

impl Decider {
    /// Creating a decider starts its solver; a missing solver binary
    /// surfaces here, before any verification begins.
    pub fn new(config: Arc<Config>, mut prover: Box<dyn Prover>) -> Result<Decider, ProverError> {
        prover.start()?;
        Ok(Decider {
            prover,
            pc: PathConditions::new(),
            config,
            arp_vars: HashSet::new(),
            bound_counter: 0,
            cache_hits: 0,
            num_asserts: 0,
        })
    }

    pub fn prover(&mut self) -> &mut dyn Prover {
        &mut *self.prover
    }

    pub fn path_conditions(&self) -> &PathConditions {
        &self.pc
    }

    pub fn comment(&mut self, s: &str) {
        self.prover.comment(s);
    }

    fn check_scope_invariant(&self) {
        debug_assert_eq!(self.pc.depth(), self.prover.push_pop_depth());
    }

    pub fn push_scope(&mut self) -> Result<(), ProverError> {
        self.pc.push_scope();
        self.prover.push(1)?;
        self.check_scope_invariant();
        Ok(())
    }

    pub fn pop_scope(&mut self) -> Result<(), ProverError> {
        self.pc.pop_scope();
        self.prover.pop(1)?;
        self.check_scope_invariant();
        Ok(())
    }

    /// Filter out trivially true terms, push the rest onto the topmost
    /// path-condition scope, and forward them to the solver.
    pub fn assume(&mut self, terms: &[Term]) -> Result<(), ProverError> {
        for t in terms {
            self.assume_one(t)?;
        }
        Ok(())
    }

    pub fn assume_one(&mut self, t: &Term) -> Result<(), ProverError> {
        if matches!(&**t, TermX::Const(Constant::Bool(true))) || self.pc.contains(t) {
            return Ok(());
        }
        self.pc.add(t.clone());
        self.prover.assume(t)
    }

    fn guarded(&self, state: &State, t: &Term) -> Term {
        match &state.partial_guard {
            Some(g) => mk_implies(g, t),
            None => t.clone(),
        }
    }

    /// Prove `t` under the current path conditions.  Returns true without
    /// consulting the solver when `t` is the true constant or a structural
    /// member of the path conditions.
    pub fn assert(
        &mut self,
        state: &State,
        t: &Term,
        timeout: Option<u32>,
    ) -> Result<bool, ProverError> {
        if matches!(&**t, TermX::Const(Constant::Bool(true))) || self.pc.contains(t) {
            self.cache_hits += 1;
            return Ok(true);
        }
        if matches!(&**t, TermX::Const(Constant::Bool(false))) && state.partial_guard.is_none() {
            return Ok(false);
        }
        self.num_asserts += 1;
        let goal = self.guarded(state, t);
        self.prover.assert_goal(&goal, timeout)
    }

    /// Like `assert`, but with no side effects beyond the SMT check.
    pub fn check(
        &mut self,
        state: &State,
        t: &Term,
        timeout: Option<u32>,
    ) -> Result<bool, ProverError> {
        if matches!(&**t, TermX::Const(Constant::Bool(true))) || self.pc.contains(t) {
            return Ok(true);
        }
        if matches!(&**t, TermX::Const(Constant::Bool(false))) && state.partial_guard.is_none() {
            return Ok(false);
        }
        let goal = self.guarded(state, t);
        self.prover.check_goal(&goal, timeout)
    }

    /// Run a block in its own assumption scope; the scope is popped on
    /// every exit path of the block.
    pub fn in_scope<R>(
        &mut self,
        f: impl FnOnce(&mut Decider) -> R,
    ) -> Result<R, ProverError> {
        self.push_scope()?;
        let r = f(self);
        self.pop_scope()?;
        Ok(r)
    }

    /// Can `t` hold together with the current path conditions?  Used to
    /// prune infeasible branches.
    pub fn feasible(&mut self, t: &Term) -> Result<bool, ProverError> {
        if matches!(&**t, TermX::Const(Constant::Bool(false))) {
            return Ok(false);
        }
        let timeout = Some(self.config.split_timeout);
        let sat = self.in_scope(|d| {
            d.assume_one(t)?;
            d.prover.check_sat(timeout)
        })??;
        Ok(sat != SatResult::Unsat)
    }

    pub fn declare(&mut self, decl: &Decl) -> Result<(), ProverError> {
        self.prover.declare(decl)
    }

    /// Mint and declare a fresh constant of the given sort.
    pub fn fresh(&mut self, prefix: &str, sort: &Sort) -> Result<Term, ProverError> {
        let fun = self.prover.fresh(prefix, &[], sort)?;
        Ok(Arc::new(TermX::Var(fun.name.clone(), sort.clone())))
    }

    /// Mint and declare a fresh uninterpreted function.
    pub fn fresh_fun(
        &mut self,
        prefix: &str,
        arg_sorts: &[Sort],
        result_sort: &Sort,
    ) -> Result<Fun, ProverError> {
        self.prover.fresh(prefix, arg_sorts, result_sort)
    }

    /// A fresh bound-variable name; never declared to the solver.
    pub fn fresh_bound(&mut self, prefix: &str) -> Ident {
        let name = format!("{}${}", prefix, self.bound_counter);
        self.bound_counter += 1;
        Arc::new(name)
    }

    /// Mint an abstract read permission: a fresh positive permission
    /// variable below `upper_bound`, returned with its constraint.
    pub fn fresh_arp(&mut self, upper_bound: &Term) -> Result<(Term, Term), ProverError> {
        let var = self.fresh(crate::def::PREFIX_ARP, &perm_sort())?;
        if let TermX::Var(x, _) = &*var {
            self.arp_vars.insert(x.clone());
        }
        let constraint = mk_and(&[
            mk_perm_less(&no_perm(), &var),
            mk_perm_less(&var, upper_bound),
        ]);
        Ok((var, constraint))
    }

    /// Does the permission term mention an abstract read permission?
    pub fn is_arp(&self, t: &Term) -> bool {
        !self.arp_vars.is_disjoint(&free_vars(t))
    }

    /// Find a basic chunk for `name` whose arguments equal `args`, first
    /// syntactically, then by letting the solver prove the equalities.
    pub fn find_chunk(
        &mut self,
        state: &State,
        name: &Ident,
        args: &[Term],
        timeout: Option<u32>,
    ) -> Result<Option<usize>, ProverError> {
        let heap = &state.heap;
        for (i, chunk) in heap.chunks().iter().enumerate() {
            if let Some(chunk_args) = basic_chunk_args(chunk, name) {
                if chunk_args.as_slice() == args {
                    return Ok(Some(i));
                }
            }
        }
        let candidates: Vec<(usize, Vec<Term>)> = heap
            .chunks()
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| basic_chunk_args(chunk, name).map(|chunk_args| (i, chunk_args)))
            .collect();
        for (i, chunk_args) in candidates {
            if chunk_args.len() != args.len() {
                continue;
            }
            let eqs: Vec<Term> = chunk_args
                .iter()
                .zip(args.iter())
                .map(|(a, b)| smtio::term::mk_eq(a, b))
                .collect();
            let goal = mk_and(&eqs);
            if matches!(&*goal, TermX::Const(Constant::Bool(false))) {
                continue;
            }
            if self.check(state, &goal, timeout)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Assume that permissions to the same field location never exceed full
    /// permission; gives the solver receiver-disequality information.
    pub fn assume_field_upper_bounds(
        &mut self,
        state: &State,
        rcvr: &Term,
        field: &Ident,
        perm: &Term,
    ) -> Result<(), ProverError> {
        let mut assumptions: Vec<Term> = Vec::new();
        for chunk in state.heap.chunks() {
            if let Chunk::Field(fc) = chunk {
                if &fc.field == field && &fc.rcvr != rcvr {
                    let sum = smtio::term::mk_perm_plus(&fc.perm, perm);
                    let bound = smtio::term::mk_perm_at_most(&sum, &smtio::term::full_perm());
                    assumptions
                        .push(mk_implies(&smtio::term::mk_eq(&fc.rcvr, rcvr), &bound));
                }
            }
        }
        self.assume(&assumptions)
    }

    /// Declare a permission macro (a define-fun) for the split algorithm.
    pub fn declare_macro(
        &mut self,
        prefix: &str,
        params: &[(Ident, Sort)],
        result_sort: &Sort,
        body: &Term,
    ) -> Result<Fun, ProverError> {
        let name = self.prover.fresh_name(prefix);
        let fun = Arc::new(FunX {
            name,
            arg_sorts: Arc::new(params.iter().map(|(_, s)| s.clone()).collect::<Vec<_>>()),
            sort: result_sort.clone(),
        });
        let binders = smtio::term_util::sort_binders(params);
        let decl = Arc::new(DeclX::DefineFun(fun.clone(), binders, body.clone()));
        self.prover.declare(&decl)?;
        Ok(fun)
    }

    pub fn statistics(&mut self) -> Result<Vec<(String, String)>, ProverError> {
        let mut stats = self.prover.statistics()?;
        stats.push(("decider-cache-hits".to_string(), self.cache_hits.to_string()));
        stats.push(("decider-asserts".to_string(), self.num_asserts.to_string()));
        Ok(stats)
    }

    pub fn stop(&mut self) -> Result<(), ProverError> {
        self.prover.stop()
    }

    pub fn reset(&mut self) -> Result<(), ProverError> {
        self.pc.reset();
        self.arp_vars.clear();
        self.prover.reset()
    }
}

fn basic_chunk_args<'a>(chunk: &'a Chunk, name: &Ident) -> Option<Vec<Term>> {
    match chunk {
        Chunk::Field(c) if &c.field == name => Some(vec![c.rcvr.clone()]),
        Chunk::Predicate(c) if &c.name == name => Some(c.args.clone()),
        _ => None,
    }
}
