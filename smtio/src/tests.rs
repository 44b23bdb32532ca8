use crate::printer::{sort_id, term_to_string};
use crate::prover::{
    AssertionMode, Prover, ProverState, SatResult, SmtDriver, SmtDriverOptions, solver_executable,
};
use crate::term::*;
use crate::term_util::*;
use std::collections::HashMap;
use std::sync::Arc;

#[test]
fn smart_constructors_fold() {
    let x = mk_var("x", &bool_sort());
    assert_eq!(mk_and(&[mk_true(), x.clone()]), x);
    assert_eq!(mk_and(&[mk_false(), x.clone()]), mk_false());
    assert_eq!(mk_or(&[mk_false(), x.clone()]), x);
    assert_eq!(mk_ite(&mk_true(), &x, &mk_false()), x);
    assert_eq!(mk_eq(&x, &x), mk_true());
    assert_eq!(mk_implies(&mk_true(), &x), x);
    assert_eq!(mk_implies(&mk_false(), &x), mk_true());
    assert_eq!(mk_not(&mk_not(&x)), x);
}

#[test]
fn permission_literals_fold() {
    let half = mk_frac(&mk_int(1), &mk_int(2));
    assert_eq!(mk_perm_plus(&half, &half), full_perm());
    assert_eq!(mk_perm_minus(&half, &half), no_perm());
    assert_eq!(mk_perm_times(&full_perm(), &half), half);
    assert_eq!(mk_perm_min(&half, &full_perm()), half);
    assert_eq!(mk_perm_less(&half, &full_perm()), mk_true());
    assert_eq!(mk_perm_at_most(&full_perm(), &half), mk_false());
    assert_eq!(mk_is_positive(&half), mk_true());
    let neg = mk_frac(&mk_int(-1), &mk_int(2));
    assert_eq!(mk_is_non_negative(&neg), mk_false());
    assert_eq!(mk_is_positive(&no_perm()), mk_false());
}

#[test]
fn symbolic_permissions_stay_symbolic() {
    let p = mk_var("p", &perm_sort());
    let sum = mk_perm_plus(&p, &mk_frac(&mk_int(1), &mk_int(2)));
    assert!(matches!(&*sum, TermX::Binary(BinaryOp::PermPlus, _, _)));
    assert_eq!(mk_perm_plus(&p, &no_perm()), p);
    assert_eq!(mk_perm_times(&full_perm(), &p), p);
}

#[test]
fn substitution_preserves_sorts() {
    let x = str_ident("x");
    let t = mk_add(&ident_var(&x, &int_sort()), &mk_int(1));
    let u = mk_mul(&mk_var("y", &int_sort()), &mk_int(3));
    let mut map = HashMap::new();
    map.insert(x, u);
    let t2 = subst(&t, &map);
    assert_eq!(t.sort(), t2.sort());
    assert!(!contains_var(&t2, &str_ident("x")));
    assert!(contains_var(&t2, &str_ident("y")));
}

#[test]
fn substitution_respects_shadowing() {
    // forall x. x = y   with [y := x + 1] must not capture x
    let x = str_ident("x");
    let y = str_ident("y");
    let body = mk_binary(BinaryOp::Eq, &ident_var(&x, &int_sort()), &ident_var(&y, &int_sort()));
    let q = mk_forall(
        &sort_binders(&[(x.clone(), int_sort())]),
        &no_triggers(),
        &str_ident("test-capture"),
        &body,
    );
    let mut map = HashMap::new();
    map.insert(y.clone(), mk_add(&ident_var(&x, &int_sort()), &mk_int(1)));
    let q2 = subst(&q, &map);
    match &*q2 {
        TermX::Quant(_, binders, _, _, body) => {
            // the binder was renamed away from x
            assert_ne!(binders[0].name, x);
            let free = free_vars(body);
            assert!(free.contains(&x));
            assert!(!free.contains(&y));
        }
        _ => panic!("expected a quantifier"),
    }

    // substituting the bound variable itself is a no-op
    let mut map = HashMap::new();
    map.insert(x.clone(), mk_int(7));
    assert_eq!(subst(&q, &map), q);
}

#[test]
fn codomain_replacement() {
    let perm = mk_ite(
        &mk_binary(BinaryOp::SetIn, &codomain_var(&ref_sort()), &mk_var("s", &set_sort(&ref_sort()))),
        &full_perm(),
        &no_perm(),
    );
    let r = mk_var("r", &ref_sort());
    let at_r = replace_codomain(&perm, &r);
    assert!(!contains_var(&at_r, &str_ident(crate::def::CODOMAIN_VAR)));
    assert!(contains_var(&at_r, &str_ident("r")));
}

#[test]
fn collect_quantifications() {
    let x = str_ident("x");
    let inner = mk_forall(
        &sort_binders(&[(x.clone(), ref_sort())]),
        &no_triggers(),
        &str_ident("inner"),
        &mk_eq(&ident_var(&x, &ref_sort()), &mk_null()),
    );
    let t = mk_and(&[mk_var("b", &bool_sort()), inner.clone()]);
    let quants = collect_subterms(&t, |t| matches!(t, TermX::Quant(..)));
    assert_eq!(quants.len(), 1);
    assert_eq!(quants[0], inner);
}

#[test]
fn print_terms() {
    let x = mk_var("x", &ref_sort());
    let f = str_ident("f");
    let fvf = mk_var("fvf@0", &fvf_sort(&f, &int_sort()));
    assert_eq!(term_to_string(&mk_eq(&x, &mk_null())), "(= x $Ref.null)");
    assert_eq!(term_to_string(&mk_lookup(&f, &fvf, &x)), "($FVF.lookup_f fvf@0 x)");
    assert_eq!(
        term_to_string(&mk_frac(&mk_int(1), &mk_int(3))),
        "(/ 1.0 3.0)"
    );
    assert_eq!(
        term_to_string(&mk_perm_min(&mk_var("p", &perm_sort()), &full_perm())),
        "($Perm.min p 1.0)"
    );
    let s = mk_var("s", &set_sort(&ref_sort()));
    assert_eq!(
        term_to_string(&mk_binary(BinaryOp::SetIn, &x, &s)),
        "(Set_in<$Ref> x s)"
    );
    assert_eq!(term_to_string(&mk_int(-2)), "(- 2)");
}

#[test]
fn print_quantifier_with_trigger_and_qid() {
    let r = str_ident("r");
    let inv = mk_fun("inv@0", &[ref_sort()], &ref_sort());
    let app = mk_app(&inv, &[ident_var(&r, &ref_sort())]);
    let q = mk_forall(
        &sort_binders(&[(r.clone(), ref_sort())]),
        &mk_triggers(&[mk_trigger(&[app.clone()])]),
        &str_ident("qp.inv@0"),
        &mk_eq(&app, &ident_var(&r, &ref_sort())),
    );
    let printed = term_to_string(&q);
    assert!(printed.starts_with("(forall ((r $Ref))"));
    assert!(printed.contains(":pattern ((inv@0 r))"));
    assert!(printed.contains(":qid qp.inv@0"));
    assert!(printed.contains(":skolemid qp.inv@0-aux"));
}

#[test]
fn sort_ids_are_mangled() {
    assert_eq!(sort_id(&set_sort(&ref_sort())), "Set<$Ref>");
    assert_eq!(sort_id(&seq_sort(&int_sort())), "Seq<Int>");
    assert_eq!(sort_id(&fvf_sort(&str_ident("f"), &int_sort())), "$FVF<f>");
    assert_eq!(sort_id(&perm_sort()), "$Perm");
}

#[test]
fn snapshot_selectors_fold() {
    let a = mk_var("a", &snap_sort());
    let b = mk_var("b", &snap_sort());
    let c = mk_combine(&a, &b);
    assert_eq!(mk_first(&c), a);
    assert_eq!(mk_second(&c), b);
    assert_eq!(c.sort(), snap_sort());
}

fn solver_available() -> bool {
    std::process::Command::new(solver_executable())
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn test_driver(mode: AssertionMode) -> SmtDriver {
    let options = SmtDriverOptions {
        exe: solver_executable(),
        args: Vec::new(),
        default_timeout_ms: 10_000,
        assertion_mode: mode,
        advanced_models: false,
    };
    SmtDriver::new(options, None)
}

#[test]
fn driver_proves_and_refutes() {
    if !solver_available() {
        eprintln!("solver not found; skipping");
        return;
    }
    let mut driver = test_driver(AssertionMode::PushPop);
    driver.start().unwrap();
    assert_eq!(driver.state(), ProverState::Running);
    let x = mk_var("x@0", &int_sort());
    driver
        .declare(&Arc::new(DeclX::Const(str_ident("x@0"), int_sort())))
        .unwrap();
    driver.assume(&mk_lt(&mk_int(0), &x)).unwrap();
    assert_eq!(driver.assert_goal(&mk_le(&mk_int(0), &x), None).unwrap(), true);
    assert_eq!(driver.assert_goal(&mk_le(&x, &mk_int(0)), None).unwrap(), false);
    // the failed assertion must not have polluted the context
    assert_eq!(driver.assert_goal(&mk_le(&mk_int(0), &x), None).unwrap(), true);
    assert_eq!(driver.check_sat(None).unwrap(), SatResult::Sat);
    let stats = driver.statistics().unwrap();
    assert!(stats.iter().any(|(k, _)| k == "queries"));
    driver.stop().unwrap();
}

#[test]
fn driver_scopes() {
    if !solver_available() {
        eprintln!("solver not found; skipping");
        return;
    }
    let mut driver = test_driver(AssertionMode::PushPop);
    driver.start().unwrap();
    let b = mk_var("b@0", &bool_sort());
    driver
        .declare(&Arc::new(DeclX::Const(str_ident("b@0"), bool_sort())))
        .unwrap();
    driver.push(1).unwrap();
    driver.assume(&b).unwrap();
    assert_eq!(driver.assert_goal(&b, None).unwrap(), true);
    driver.pop(1).unwrap();
    // outside the scope b is no longer assumed
    assert_eq!(driver.assert_goal(&b, None).unwrap(), false);
    assert_eq!(driver.push_pop_depth(), 0);
    driver.stop().unwrap();
}

#[test]
fn driver_soft_constraints() {
    if !solver_available() {
        eprintln!("solver not found; skipping");
        return;
    }
    let mut driver = test_driver(AssertionMode::SoftConstraints);
    driver.start().unwrap();
    let x = mk_var("x@1", &int_sort());
    driver
        .declare(&Arc::new(DeclX::Const(str_ident("x@1"), int_sort())))
        .unwrap();
    driver.assume(&mk_eq(&x, &mk_int(3))).unwrap();
    assert_eq!(driver.assert_goal(&mk_lt(&x, &mk_int(4)), None).unwrap(), true);
    assert_eq!(driver.assert_goal(&mk_lt(&x, &mk_int(3)), None).unwrap(), false);
    assert_eq!(driver.assert_goal(&mk_lt(&x, &mk_int(4)), None).unwrap(), true);
    driver.stop().unwrap();
}

#[test]
fn driver_missing_binary() {
    let options = SmtDriverOptions {
        exe: "definitely-not-an-smt-solver".to_string(),
        ..Default::default()
    };
    let mut driver = SmtDriver::new(options, None);
    match driver.start() {
        Err(crate::prover::ProverError::DependencyNotFound(_)) => {}
        other => panic!("expected DependencyNotFound, got {:?}", other.map(|_| ())),
    }
    assert_eq!(driver.state(), ProverState::Erroneous);
}
