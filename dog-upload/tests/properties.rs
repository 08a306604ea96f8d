use proptest::prelude::*;

use dog_upload::{ChunkPlanner, PartStatus, ProgressAggregator};

proptest! {
    #[test]
    fn planned_parts_cover_the_file_exactly(
        file_size in 1u64..2_000_000,
        chunk_size in 32u64..1_000_000,
    ) {
        let parts = ChunkPlanner::plan(file_size, chunk_size).unwrap();

        let mut expected_start = 0;
        for (i, part) in parts.iter().enumerate() {
            prop_assert_eq!(part.part_number as usize, i + 1);
            prop_assert_eq!(part.start, expected_start);
            prop_assert_eq!(part.end - part.start, part.size);
            expected_start = part.end;
        }
        prop_assert_eq!(expected_start, file_size);
        prop_assert_eq!(parts.iter().map(|p| p.size).sum::<u64>(), file_size);
    }

    #[test]
    fn part_count_and_sizes_follow_the_chunk_size(
        file_size in 1u64..2_000_000,
        chunk_size in 32u64..1_000_000,
    ) {
        let parts = ChunkPlanner::plan(file_size, chunk_size).unwrap();

        prop_assert_eq!(parts.len() as u64, file_size.div_ceil(chunk_size));
        let count = ChunkPlanner::part_count(file_size, chunk_size).unwrap();
        prop_assert_eq!(count, parts.len() as u64);

        let (last, rest) = parts.split_last().unwrap();
        prop_assert!(last.size > 0 && last.size <= chunk_size);
        prop_assert!(rest.iter().all(|p| p.size == chunk_size));
    }

    #[test]
    fn part_percent_never_decreases(updates in prop::collection::vec(0u8..=120, 1..40)) {
        let mut aggregator = ProgressAggregator::new();
        aggregator.initialize(&ChunkPlanner::plan(10, 10).unwrap());
        aggregator.on_part_started(1).unwrap();

        let mut last = 0;
        for percent in updates {
            aggregator.on_part_progress(1, percent);
            let record = aggregator.get(1).unwrap();
            prop_assert!(record.percent >= last);
            prop_assert!(record.percent <= 100);
            last = record.percent;
        }

        aggregator.on_part_completed(1).unwrap();
        let record = aggregator.get(1).unwrap();
        prop_assert_eq!(record.status, PartStatus::Completed);
        prop_assert_eq!(record.percent, 100);
    }

    #[test]
    fn overall_percent_counts_only_completed_parts(
        outcomes in prop::collection::vec((any::<bool>(), 0u8..=99), 1..60)
    ) {
        let total = outcomes.len() as u64;
        let mut aggregator = ProgressAggregator::new();
        aggregator.initialize(&ChunkPlanner::plan(total, 1).unwrap());

        let mut completed = 0u64;
        for (i, (done, partial)) in outcomes.iter().enumerate() {
            let part_number = i as u32 + 1;
            aggregator.on_part_started(part_number).unwrap();
            aggregator.on_part_progress(part_number, *partial);
            if *done {
                aggregator.on_part_completed(part_number).unwrap();
                completed += 1;
            }

            let expected = (100.0 * completed as f64 / total as f64).round() as u8;
            prop_assert_eq!(aggregator.overall_percent(), expected);
        }
    }
}
