#![forbid(unsafe_code)]

use kuberef_search::{best_above, rank, thresholds};

#[test]
fn looser_threshold_for_numeric_ports() {
    let ports = ["80", "443", "8443"];
    // "8080" shares one bigram with "80" and none with the others
    assert!(best_above(&ports, "8080", thresholds::NAMED_PORT).is_empty());
    let kept = best_above(&ports, "8080", thresholds::NUMERIC_PORT);
    assert_eq!(kept.iter().map(|r| r.candidate.as_str()).collect::<Vec<_>>(), vec!["80"]);
}

#[test]
fn scores_stay_in_unit_range() {
    for r in rank(&["", "a", "payments", "payments-svc", "PAYMENTS"], "payments") {
        assert!((0.0..=1.0).contains(&r.score), "{} scored {}", r.candidate, r.score);
    }
}

#[test]
fn key_threshold_suggests_near_keys_only() {
    let keys = ["password", "username", "host"];
    let kept = best_above(&keys, "pasword", thresholds::KEY);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].candidate, "password");
    assert_eq!(kept[0].index, 0);
}
