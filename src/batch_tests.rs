// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the batch planner.

#[cfg(test)]
mod tests {
    use crate::batch::*;
    use crate::diff::{compute_diff, Diff, DiffOperation};
    use crate::errors::ConfigError;
    use crate::records::{DesiredState, RecordData, ReservedNames, ResourceRecord};
    use crate::snapshot::ZoneSnapshot;
    use hickory_client::rr::Name;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn reserved() -> ReservedNames {
        ReservedNames::new(&name("example.com."), &["ns"]).unwrap()
    }

    fn a(owner: &str, ip: &str) -> ResourceRecord {
        ResourceRecord::new(&name(owner), 300, RecordData::A(ip.parse().unwrap()))
    }

    fn cname(owner: &str, target: &str) -> ResourceRecord {
        ResourceRecord::new(&name(owner), 300, RecordData::cname(&name(target)))
    }

    fn limited(n: i64) -> BatchSize {
        BatchSize::new(n).unwrap()
    }

    /// Diff of eight operations with replacement pairs at positions 1-2 and 5-6:
    /// `[+a, -c1, +c1, +b1, +b2, -c2, +c2, +d]`
    fn diff_with_pairs() -> Diff {
        let mut want = DesiredState::new(reserved());
        want.insert(a("a.example.com.", "192.0.2.1")).unwrap();
        want.insert(cname("c1.example.com.", "new.example.com.")).unwrap();
        want.insert(a("b.example.com.", "192.0.2.2")).unwrap();
        want.insert(a("b.example.com.", "192.0.2.3")).unwrap();
        want.insert(cname("c2.example.com.", "new.example.com.")).unwrap();
        want.insert(a("d.example.com.", "192.0.2.4")).unwrap();

        let live = ZoneSnapshot::from_records(
            &reserved(),
            1,
            vec![
                cname("c1.example.com.", "old.example.com."),
                cname("c2.example.com.", "old.example.com."),
            ],
        );
        let diff = compute_diff(&live, &want);
        assert_eq!(diff.len(), 8);
        assert!(diff.is_paired_with_next(1));
        assert!(diff.is_paired_with_next(5));
        diff
    }

    fn flatten(batches: &[Batch<'_>]) -> Vec<DiffOperation> {
        batches
            .iter()
            .flat_map(|b| b.operations().iter().cloned())
            .collect()
    }

    #[test]
    fn test_batch_size_rejects_zero_and_negative() {
        assert_eq!(
            BatchSize::new(0),
            Err(ConfigError::InvalidBatchSize { value: 0 })
        );
        assert_eq!(
            BatchSize::new(-4),
            Err(ConfigError::InvalidBatchSize { value: -4 })
        );
        assert_eq!(limited(3).limit(), Some(3));
        assert_eq!(BatchSize::default().limit(), None);
    }

    #[test]
    fn test_batch_size_from_str() {
        assert_eq!("7".parse::<BatchSize>().unwrap().limit(), Some(7));
        assert!("seven".parse::<BatchSize>().is_err());
        assert!("0".parse::<BatchSize>().is_err());
    }

    #[test]
    fn test_empty_diff_has_no_batches() {
        let diff = Diff::default();

        assert!(plan_batches(&diff, BatchSize::Unbounded).is_empty());
        assert!(plan_batches(&diff, limited(1)).is_empty());
    }

    #[test]
    fn test_unbounded_is_a_single_batch() {
        let diff = diff_with_pairs();
        let batches = plan_batches(&diff, BatchSize::Unbounded);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 8);
        assert_eq!(batches[0].index(), 0);
    }

    #[test]
    fn test_window_shrinks_to_keep_pair_together() {
        let diff = diff_with_pairs();
        let batches = plan_batches(&diff, limited(2));

        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        // [+a] [-c1 +c1] [+b1 +b2] [-c2 +c2] [+d]
        assert_eq!(sizes, vec![1, 2, 2, 2, 1]);
    }

    #[test]
    fn test_pair_exceeds_limit_of_one() {
        let diff = diff_with_pairs();
        let batches = plan_batches(&diff, limited(1));

        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![1, 2, 1, 1, 2, 1]);
    }

    #[test]
    fn test_common_case_uses_ceiling_division() {
        let mut want = DesiredState::new(reserved());
        for i in 1..=7 {
            want.insert(a("www.example.com.", &format!("192.0.2.{i}"))).unwrap();
        }
        let diff = compute_diff(&ZoneSnapshot::empty(&reserved(), 1), &want);

        assert_eq!(plan_batches(&diff, limited(3)).len(), 3);
        assert_eq!(plan_batches(&diff, limited(7)).len(), 1);
        assert_eq!(plan_batches(&diff, limited(100)).len(), 1);
    }

    #[test]
    fn test_no_pair_is_split_for_any_size() {
        let diff = diff_with_pairs();

        for size in 1..=9 {
            let batches = plan_batches(&diff, limited(size));

            assert_eq!(flatten(&batches), diff.operations().to_vec(), "size {size}");

            let mut start = 0;
            for (index, batch) in batches.iter().enumerate() {
                assert_eq!(batch.index(), index);
                assert!(!batch.is_empty());
                let end = start + batch.len();
                assert!(
                    !diff.is_paired_with_next(end - 1) || end == diff.len(),
                    "size {size}: batch {index} ends inside a pair"
                );
                let limit = usize::try_from(size).unwrap();
                assert!(batch.len() <= limit.max(2), "size {size}: batch {index} too large");
                start = end;
            }
        }
    }
}
