//! Property tests for the bounded statistics window.

use analysis::{BoundedStatsWindow, OutlierPolicy};
use proptest::prelude::*;

fn policy() -> impl Strategy<Value = OutlierPolicy> {
    prop_oneof![
        Just(OutlierPolicy::None),
        Just(OutlierPolicy::Lower),
        Just(OutlierPolicy::Upper),
        Just(OutlierPolicy::Both),
        Just(OutlierPolicy::WidePlus1),
    ]
}

proptest! {
    #[test]
    fn holds_the_most_recent_values_newest_first(
        capacity in 1usize..16,
        pushes in prop::collection::vec(-1000.0f64..1000.0, 0..64),
        policy in policy(),
    ) {
        let mut w = BoundedStatsWindow::new(capacity, policy);
        for v in &pushes {
            w.push_front(*v);
            prop_assert!(w.len() <= capacity);
        }
        let held: Vec<f64> = w.values().filter(|v| !v.is_nan()).collect();
        let expected: Vec<f64> = pushes.iter().rev().take(capacity).copied().collect();
        prop_assert_eq!(held, expected);
    }

    #[test]
    fn filtered_stats_stay_inside_fences(
        values in prop::collection::vec(-50.0f64..50.0, 2..20),
        policy in policy(),
    ) {
        let mut w = BoundedStatsWindow::new(values.len(), policy);
        for v in &values {
            w.push_front(*v);
        }
        let s = w.stats();
        prop_assert!(s.count >= 1);
        prop_assert!(s.min >= s.lower_bound && s.max <= s.upper_bound);
        prop_assert!(s.min <= s.mean + 1e-9 && s.mean <= s.max + 1e-9);
        prop_assert!(s.std >= 0.0);
    }

    #[test]
    fn fill_reads_back_the_fill_value(
        capacity in 1usize..16,
        v in -1000.0f64..1000.0,
        policy in policy(),
    ) {
        let mut w = BoundedStatsWindow::new(capacity, policy);
        w.fill(v);
        let s = w.stats();
        prop_assert_eq!(s.min, v);
        prop_assert_eq!(s.max, v);
        prop_assert!((s.mean - v).abs() <= 1e-9 * v.abs().max(1.0));
        prop_assert!(s.q1.is_nan() && s.q3.is_nan());
    }
}

#[test]
fn window_stats_serialize_for_display() {
    let mut w = BoundedStatsWindow::new(3, OutlierPolicy::Both);
    w.push_front(1.0);
    w.push_front(2.0);
    let json = serde_json::to_value(w.stats()).unwrap();
    assert_eq!(json["count"], 2);
    assert_eq!(json["mean"], 1.5);
}
