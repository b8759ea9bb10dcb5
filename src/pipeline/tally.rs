use serde::{Deserialize, Serialize};

use crate::{config::ConfigLabels, impulse::Detection};

/// Per-frame counts of the configured labels.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
pub struct FrameTally {
    pub target_count: u32,
    pub reference_present: bool,
}

/// Whether the current frame warrants an alert. Never carried over to the next frame.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
pub struct Verdict {
    pub should_alert: bool,
    /// Zero unless `should_alert`
    pub deficit: u32,
    pub counted: u32,
}

/// Labels other than the target and the reference are ignored.
pub fn aggregate(labels: &ConfigLabels, detections: &[Detection]) -> FrameTally {
    detections
        .iter()
        .fold(FrameTally::default(), |mut tally, detection| {
            if detection.label == labels.target {
                tally.target_count += 1;
            } else if detection.label == labels.reference {
                tally.reference_present = true;
            }
            tally
        })
}

/// Without the reference object in view nothing was observed, so a low count never alerts.
pub fn evaluate(tally: &FrameTally, required_count: u32) -> Verdict {
    let should_alert = tally.reference_present && tally.target_count < required_count;
    Verdict {
        should_alert,
        deficit: if should_alert {
            required_count - tally.target_count
        } else {
            0
        },
        counted: tally.target_count,
    }
}

#[cfg(test)]
mod test {
    use super::{aggregate, evaluate, FrameTally, Verdict};
    use crate::{config::ConfigLabels, impulse::Detection};

    fn frame(lug_nuts: usize, wheels: usize, others: usize) -> Vec<Detection> {
        let mut detections = Vec::new();
        detections.extend((0..lug_nuts).map(|i| Detection::new("lug_nut", 0.9, i as u32 * 10, 5, 8, 8)));
        detections.extend((0..wheels).map(|_| Detection::new("wheel", 0.8, 0, 0, 120, 120)));
        detections.extend((0..others).map(|_| Detection::new("hubcap", 0.7, 30, 30, 40, 40)));
        detections
    }

    fn verdict_for(detections: &[Detection], required: u32) -> Verdict {
        evaluate(&aggregate(&ConfigLabels::default(), detections), required)
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(
            aggregate(&ConfigLabels::default(), &[]),
            FrameTally {
                target_count: 0,
                reference_present: false
            }
        );
    }

    #[test]
    fn test_aggregate_ignores_unknown_labels() {
        let tally = aggregate(&ConfigLabels::default(), &frame(3, 0, 4));
        assert_eq!(tally.target_count, 3);
        assert!(!tally.reference_present);
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let labels = ConfigLabels::default();
        let mut detections = frame(4, 2, 3);
        let expected = aggregate(&labels, &detections);
        for _ in 0..detections.len() {
            detections.rotate_left(1);
            assert_eq!(aggregate(&labels, &detections), expected);
        }
        detections.reverse();
        assert_eq!(aggregate(&labels, &detections), expected);
    }

    #[test]
    fn test_aggregate_uses_configured_labels() {
        let labels = ConfigLabels {
            target: "bolt".into(),
            reference: "flange".into(),
        };
        let detections = vec![
            Detection::new("bolt", 0.9, 0, 0, 1, 1),
            Detection::new("flange", 0.9, 0, 0, 1, 1),
            Detection::new("lug_nut", 0.9, 0, 0, 1, 1),
            Detection::new("wheel", 0.9, 0, 0, 1, 1),
        ];
        assert_eq!(
            aggregate(&labels, &detections),
            FrameTally {
                target_count: 1,
                reference_present: true
            }
        );
    }

    #[test]
    fn test_no_reference_never_alerts() {
        for required in 0..10 {
            for count in 0..10 {
                let tally = FrameTally {
                    target_count: count,
                    reference_present: false,
                };
                assert!(!evaluate(&tally, required).should_alert);
            }
        }
    }

    #[test]
    fn test_reference_alerts_below_required() {
        for required in 0..10 {
            for count in 0..10 {
                let tally = FrameTally {
                    target_count: count,
                    reference_present: true,
                };
                let verdict = evaluate(&tally, required);
                assert_eq!(verdict.should_alert, count < required);
                assert_eq!(verdict.counted, count);
                if verdict.should_alert {
                    assert_eq!(verdict.deficit, required - count);
                    assert!(verdict.deficit > 0);
                } else {
                    assert_eq!(verdict.deficit, 0);
                }
            }
        }
    }

    #[test]
    fn test_full_wheel() {
        assert!(!verdict_for(&frame(6, 1, 0), 6).should_alert);
    }

    #[test]
    fn test_missing_lug_nuts() {
        assert_eq!(
            verdict_for(&frame(4, 1, 0), 6),
            Verdict {
                should_alert: true,
                deficit: 2,
                counted: 4
            }
        );
    }

    #[test]
    fn test_missing_lug_nuts_without_wheel() {
        assert!(!verdict_for(&frame(4, 0, 0), 6).should_alert);
    }
}
