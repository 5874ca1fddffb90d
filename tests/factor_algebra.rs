use approx::assert_abs_diff_eq;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use sumprod::{DiscreteFactor, FactorError, Variable};

fn var(name: &str, cardinality: usize) -> Variable {
    Variable::new(name, cardinality).unwrap()
}

fn factor(names: &[(&str, usize)], values: Vec<f64>) -> DiscreteFactor {
    let scope = names.iter().map(|(n, c)| var(n, *c)).collect();
    DiscreteFactor::new(scope, values).unwrap()
}

fn assert_tables_close(left: &DiscreteFactor, right: &DiscreteFactor, epsilon: f64) {
    assert_eq!(left.table().shape(), right.table().shape());
    for (l, r) in left.table().iter().zip(right.table().iter()) {
        assert_abs_diff_eq!(*l, *r, epsilon = epsilon);
    }
}

#[test]
fn product_broadcasts_disjoint_scopes() {
    let f1 = factor(&[("A", 2)], vec![2.0, 3.0]);
    let f2 = factor(&[("B", 2)], vec![5.0, 7.0]);
    let p = f1.product(&f2).unwrap();
    let names: Vec<&str> = p.scope().iter().map(|v| v.name()).collect();
    assert_eq!(names, ["A", "B"]);
    let flat: Vec<f64> = p.table().iter().cloned().collect();
    assert_eq!(flat, [10.0, 14.0, 15.0, 21.0]);
}

#[test]
fn product_aligns_shared_variables() {
    // phi(A,B) * phi(B,C): B must line up regardless of its axis position
    let f1 = factor(&[("A", 2), ("B", 2)], vec![0.5, 0.8, 0.1, 0.3]);
    let f2 = factor(&[("B", 2), ("C", 2)], vec![0.6, 0.4, 0.2, 0.9]);
    let p = f1.product(&f2).unwrap();
    let names: Vec<&str> = p.scope().iter().map(|v| v.name()).collect();
    assert_eq!(names, ["A", "B", "C"]);
    for a in 0..2 {
        for b in 0..2 {
            for c in 0..2 {
                let expected = f1.table()[[a, b]] * f2.table()[[b, c]];
                assert_abs_diff_eq!(p.table()[[a, b, c]], expected, epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn product_commutes_up_to_scope_order() {
    let f1 = factor(&[("A", 2), ("B", 3)], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    let f2 = factor(&[("B", 3), ("C", 2)], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let left = f1.product(&f2).unwrap();
    let order: Vec<&str> = left.scope().iter().map(|v| v.name()).collect();
    let right = f2.product(&f1).unwrap().reordered(&order).unwrap();
    assert_tables_close(&left, &right, 1e-9);
}

#[test]
fn product_is_associative() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
    let mut table = |n: usize| -> Vec<f64> { (0..n).map(|_| rng.gen_range(0.1..1.0)).collect() };
    let f1 = factor(&[("A", 2), ("B", 2)], table(4));
    let f2 = factor(&[("B", 2), ("C", 3)], table(6));
    let f3 = factor(&[("C", 3), ("D", 2)], table(6));
    let left = f1.product(&f2).unwrap().product(&f3).unwrap();
    let order: Vec<&str> = left.scope().iter().map(|v| v.name()).collect();
    let right = f1
        .product(&f2.product(&f3).unwrap())
        .unwrap()
        .reordered(&order)
        .unwrap();
    assert_tables_close(&left, &right, 1e-9);
}

#[test]
fn product_rejects_conflicting_cardinalities() {
    let f1 = factor(&[("A", 2)], vec![1.0, 1.0]);
    let f2 = factor(&[("A", 3)], vec![1.0, 1.0, 1.0]);
    assert!(matches!(
        f1.product(&f2),
        Err(FactorError::CardinalityMismatch { .. })
    ));
}

#[test]
fn marginalize_sums_out_one_variable() {
    let f = factor(&[("A", 2), ("B", 2)], vec![0.5, 0.8, 0.1, 0.3]);
    let m = f.marginalize(&["B"]).unwrap();
    let names: Vec<&str> = m.scope().iter().map(|v| v.name()).collect();
    assert_eq!(names, ["A"]);
    assert_abs_diff_eq!(m.table()[[0]], 1.3, epsilon = 1e-12);
    assert_abs_diff_eq!(m.table()[[1]], 0.4, epsilon = 1e-12);
}

#[test]
fn marginalize_all_equals_total_mass() {
    let f = factor(&[("A", 2), ("B", 3)], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    let scalar = f.marginalize(&["A", "B"]).unwrap();
    assert!(scalar.scope().is_empty());
    assert_abs_diff_eq!(scalar.sum(), f.sum(), epsilon = 1e-12);
    assert_abs_diff_eq!(scalar.sum(), 2.1, epsilon = 1e-12);
}

#[test]
fn marginalize_unknown_variable_fails() {
    let f = factor(&[("A", 2)], vec![1.0, 2.0]);
    assert_eq!(
        f.marginalize(&["Z"]),
        Err(FactorError::UnknownVariable("Z".to_owned()))
    );
}

#[test]
fn reduce_clamps_and_drops_the_variable() {
    let f = factor(&[("A", 2), ("B", 2)], vec![0.5, 0.8, 0.1, 0.3]);
    let r = f.reduce("A", 1).unwrap();
    let names: Vec<&str> = r.scope().iter().map(|v| v.name()).collect();
    assert_eq!(names, ["B"]);
    assert_eq!(r.table()[[0]], 0.1);
    assert_eq!(r.table()[[1]], 0.3);
}

#[test]
fn reduce_checks_the_domain() {
    let f = factor(&[("A", 2), ("B", 2)], vec![0.5, 0.8, 0.1, 0.3]);
    assert!(matches!(
        f.reduce("A", 2),
        Err(FactorError::StateOutOfRange { .. })
    ));
    assert_eq!(
        f.reduce("Z", 0),
        Err(FactorError::UnknownVariable("Z".to_owned()))
    );
}

#[test]
fn normalize_is_idempotent() {
    let f = factor(&[("A", 2), ("B", 2)], vec![0.5, 0.8, 0.1, 0.3]);
    let once = f.normalize().unwrap();
    let twice = once.normalize().unwrap();
    assert_abs_diff_eq!(once.sum(), 1.0, epsilon = 1e-12);
    assert_tables_close(&once, &twice, 1e-15);
}

#[test]
fn normalize_rejects_zero_mass() {
    let f = factor(&[("A", 2)], vec![0.0, 0.0]);
    assert_eq!(f.normalize(), Err(FactorError::Degenerate));
}

#[test]
fn operations_never_mutate_operands() {
    let f = factor(&[("A", 2), ("B", 2)], vec![0.5, 0.8, 0.1, 0.3]);
    let snapshot = f.table().clone();
    let _ = f.product(&f.reduce("A", 0).unwrap()).unwrap();
    let _ = f.marginalize(&["B"]).unwrap();
    let _ = f.normalize().unwrap();
    assert_eq!(f.table(), &snapshot);
}

#[test]
fn construction_validates_inputs() {
    assert!(matches!(
        Variable::new("A", 0),
        Err(FactorError::EmptyDomain(_))
    ));
    assert!(matches!(
        DiscreteFactor::new(vec![var("A", 2), var("A", 2)], vec![1.0; 4]),
        Err(FactorError::DuplicateScopeVariable(_))
    ));
    assert!(matches!(
        DiscreteFactor::new(vec![var("A", 2), var("B", 2)], vec![1.0; 3]),
        Err(FactorError::TableSize {
            got: 3,
            expected: 4
        })
    ));
    assert!(matches!(
        DiscreteFactor::new(vec![var("A", 2)], vec![1.0, -0.5]),
        Err(FactorError::InvalidValue(_))
    ));
    assert!(matches!(
        DiscreteFactor::new(vec![var("A", 2)], vec![1.0, f64::NAN]),
        Err(FactorError::InvalidValue(_))
    ));
}
