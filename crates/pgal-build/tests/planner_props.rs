use pgal_build::plan_chunks;
use proptest::prelude::*;

proptest! {
    /// Chunks tile the id space in order with no gaps or overlaps.
    #[test]
    fn chunks_cover_every_id_once(sizes in prop::collection::vec(0u64..50, 0..200), ceiling in 1u64..120) {
        let plans = plan_chunks(&sizes, ceiling);
        let mut next = 0u32;
        for (pos, plan) in plans.iter().enumerate() {
            prop_assert_eq!(plan.chunk_id as usize, pos);
            prop_assert_eq!(plan.start, next);
            prop_assert!(plan.end >= plan.start);
            next = plan.end + 1;
        }
        prop_assert_eq!(next as usize, sizes.len());
    }

    /// A multi-asset chunk never exceeds the ceiling.
    #[test]
    fn multi_asset_chunks_respect_ceiling(sizes in prop::collection::vec(0u64..50, 1..200), ceiling in 1u64..120) {
        for plan in plan_chunks(&sizes, ceiling) {
            let members = &sizes[plan.start as usize..=plan.end as usize];
            if members.len() > 1 {
                prop_assert!(members.iter().sum::<u64>() <= ceiling);
            }
        }
    }
}
