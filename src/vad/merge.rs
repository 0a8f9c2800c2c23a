use super::{Segment, SpeechTimestamp};

/// Samples spanned by `stitch_ms` at `sample_rate`, rounded to the nearest sample.
pub(crate) fn gap_samples(stitch_ms: u32, sample_rate: u32) -> usize {
    (stitch_ms as f64 / 1000.0 * sample_rate as f64).round() as usize
}

/// Merge raw speech runs into sorted, disjoint, padded segments.
///
/// Runs closer than the stitch gap are joined first. Each joined run is then padded by the
/// same gap on both sides, clamped to `[0, total_samples]`, and any runs the padding made
/// touch or overlap are joined again.
pub fn merge(
    timestamps: &[SpeechTimestamp],
    stitch_ms: u32,
    sample_rate: u32,
    total_samples: usize,
) -> Vec<Segment> {
    if timestamps.is_empty() {
        return Vec::new();
    }
    let gap = gap_samples(stitch_ms, sample_rate);

    let mut padded: Vec<Segment> = join_within_gap(timestamps, gap)
        .into_iter()
        .map(|t| {
            let start = t.start.saturating_sub(gap).min(total_samples);
            let end = t.end.saturating_add(gap).min(total_samples);
            Segment::new(start, end)
        })
        .collect();
    padded.sort_by_key(|t| (t.start, t.end));

    coalesce(padded, |acc, next| next.start <= acc.end)
}

/// Sort and join runs whose distance to the previous run is less than `gap`.
pub(crate) fn join_within_gap(timestamps: &[SpeechTimestamp], gap: usize) -> Vec<SpeechTimestamp> {
    let mut sorted = timestamps.to_vec();
    sorted.sort_by_key(|t| (t.start, t.end));
    coalesce(sorted, |acc, next| next.start.saturating_sub(acc.end) < gap)
}

fn coalesce(
    runs: Vec<SpeechTimestamp>,
    joins: impl Fn(&SpeechTimestamp, &SpeechTimestamp) -> bool,
) -> Vec<SpeechTimestamp> {
    let mut out: Vec<SpeechTimestamp> = Vec::with_capacity(runs.len());
    for next in runs {
        match out.last_mut() {
            Some(acc) if joins(acc, &next) => acc.end = acc.end.max(next.end),
            _ => out.push(next),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(start: usize, end: usize) -> SpeechTimestamp {
        SpeechTimestamp::new(start, end)
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(merge(&[], 1_600, 16_000, 1_000).is_empty());
    }

    #[test]
    fn gap_is_rounded_stitch_duration() {
        assert_eq!(gap_samples(1_600, 16_000), 25_600);
        assert_eq!(gap_samples(100, 8_000), 800);
        assert_eq!(gap_samples(1, 22_050), 22);
    }

    #[test]
    fn join_boundary_is_strictly_less_than_gap() {
        let gap = 25_600;
        let a = ts(0, 32_000);

        let near = join_within_gap(&[a, ts(32_000 + gap - 1, 40_000)], gap);
        assert_eq!(near, vec![ts(0, 40_000)]);

        let far = join_within_gap(&[a, ts(32_000 + gap, 40_000)], gap);
        assert_eq!(far.len(), 2);
    }

    #[test]
    fn runs_one_sample_short_of_the_gap_merge() {
        // 10 ms at 16 kHz: gap = 160.
        let total = 100_000;
        let merged = merge(&[ts(10_000, 20_000), ts(20_159, 30_000)], 10, 16_000, total);
        assert_eq!(merged, vec![ts(9_840, 30_160)]);
    }

    #[test]
    fn runs_exactly_the_gap_apart_stay_separate_before_padding() {
        // With a 0 ms stitch nothing pads, so phase one alone decides.
        let merged = merge(&[ts(0, 100), ts(101, 200)], 0, 16_000, 1_000);
        assert_eq!(merged, vec![ts(0, 100), ts(101, 200)]);

        // gap = 160; a distance of exactly 160 is not merged in phase one, but padding by 160 on
        // both sides makes the runs overlap and phase two joins them.
        let merged = merge(&[ts(1_000, 2_000), ts(2_160, 3_000)], 10, 16_000, 10_000);
        assert_eq!(merged, vec![ts(840, 3_160)]);
    }

    #[test]
    fn separate_runs_survive_when_padding_does_not_meet() {
        // gap = 160; the runs are 400 apart so padded edges stay 80 apart.
        let merged = merge(&[ts(1_000, 2_000), ts(2_400, 3_000)], 10, 16_000, 10_000);
        assert_eq!(merged, vec![ts(840, 2_160), ts(2_240, 3_160)]);
    }

    #[test]
    fn unsorted_and_overlapping_input_is_normalized() {
        let merged = merge(
            &[ts(5_000, 6_000), ts(1_000, 3_000), ts(2_000, 2_500)],
            10,
            16_000,
            10_000,
        );
        assert_eq!(merged, vec![ts(840, 3_160), ts(4_840, 6_160)]);
    }

    #[test]
    fn padding_is_clamped_to_the_stream() {
        let total = 4_000;
        let merged = merge(&[ts(50, 300), ts(3_900, 4_000)], 100, 16_000, total);
        for seg in &merged {
            assert!(seg.end <= total);
            assert!(seg.start <= seg.end);
        }
        assert_eq!(merged, vec![ts(0, 1_900), ts(2_300, total)]);
    }

    #[test]
    fn output_is_sorted_and_disjoint() {
        let input: Vec<_> = (0..50)
            .map(|i| ts((i * 7_919) % 90_000, (i * 7_919) % 90_000 + 300))
            .collect();
        let merged = merge(&input, 20, 16_000, 90_000);
        for pair in merged.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
        assert!(merged.iter().all(|s| s.end <= 90_000));
    }
}
